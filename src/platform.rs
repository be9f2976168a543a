//! OS integration. The engine core is portable; only Windows has a backend.

#[cfg(windows)]
pub mod win32;
