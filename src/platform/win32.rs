//! Win32 backends: keyboard hook, raw input window, vJoy and SendInput.

pub mod foreground;
pub mod hook;
pub mod keyboard;
pub mod rawinput;
pub mod signal;
pub mod sink;
pub mod vjoy;

pub use foreground::Win32ForegroundProbe;
pub use hook::Win32KeyHook;
pub use rawinput::RawInputSurface;
pub use signal::set_control_ctrl_handler;
pub use sink::Win32OutputSink;
