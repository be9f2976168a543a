use std::sync::OnceLock;

use crossbeam_channel::{Receiver, Sender};
use windows::Win32::Foundation::E_FAIL;
use windows::Win32::System::Console::*;
use windows::core::*;

static EXIT_SENDER: OnceLock<Sender<()>> = OnceLock::new();

/// Installs the console handler. The returned receiver yields once when
/// Ctrl-C, Ctrl-Break or console close is requested.
pub fn set_control_ctrl_handler() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    if EXIT_SENDER.set(tx).is_err() {
        return Err(Error::new(E_FAIL, "console handler already installed"));
    }
    unsafe { SetConsoleCtrlHandler(Some(console_handler), true)? };
    Ok(rx)
}

#[allow(non_snake_case)]
unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    match ctrl_type {
        CTRL_C_EVENT | CTRL_BREAK_EVENT | CTRL_CLOSE_EVENT => {
            match EXIT_SENDER.get() {
                Some(tx) => {
                    let _ = tx.try_send(()); // graceful shutdown
                }
                None => std::process::exit(0), // force shutdown
            }
            BOOL(1) // Event has been handled
        }
        _ => BOOL(0), // Leave other events to the default handler
    }
}
