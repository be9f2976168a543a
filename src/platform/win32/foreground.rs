use windows::Win32::Foundation::{CloseHandle, MAX_PATH};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW,
};
use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};
use windows::core::PWSTR;

use crate::guard::ForegroundProbe;

/// Resolves the executable of the process owning the foreground window.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32ForegroundProbe;

impl ForegroundProbe for Win32ForegroundProbe {
    fn foreground_executable(&self) -> Option<String> {
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.0.is_null() {
                return None;
            }

            let mut process_id: u32 = 0;
            GetWindowThreadProcessId(hwnd, Some(&mut process_id as *mut u32));
            if process_id == 0 {
                return None;
            }

            let process_handle =
                OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id).ok()?;

            let mut buffer = [0u16; MAX_PATH as usize];
            let mut size = buffer.len() as u32;

            let queried = QueryFullProcessImageNameW(
                process_handle,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut size,
            );
            let _ = CloseHandle(process_handle);
            queried.ok()?;

            let path = String::from_utf16_lossy(&buffer[..size as usize]);
            path.split('\\').next_back().map(|s| s.to_lowercase())
        }
    }
}
