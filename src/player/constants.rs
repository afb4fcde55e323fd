/// Voice websocket close codes after which the session cannot recover on its
/// own: authentication failed (4004), session no longer valid (4006), session
/// timeout (4009), voice server not found (4011) and disconnected (4014).
pub const FATAL_CLOSE_CODES: &[u16] = &[4004, 4006, 4009, 4011, 4014];

/// The node's volume scale: 100 is unity gain.
pub const NODE_VOLUME_UNITY: f32 = 100.0;
