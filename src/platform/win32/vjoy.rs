//! vJoy virtual joystick driven through the runtime-loaded `vJoyInterface.dll`.

use windows::Win32::Foundation::{FreeLibrary, HMODULE};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::core::{PCSTR, w};

use crate::sink::SinkError;

type VJoyEnabledFn = unsafe extern "C" fn() -> i32;
type AcquireVjdFn = unsafe extern "C" fn(u32) -> i32;
type RelinquishVjdFn = unsafe extern "C" fn(u32);
type GetVjdStatusFn = unsafe extern "C" fn(u32) -> i32;
type SetBtnFn = unsafe extern "C" fn(i32, u32, u8) -> i32;
type ResetButtonsFn = unsafe extern "C" fn(u32) -> i32;

/// `VjdStat` values reported by `GetVJDStatus`.
const VJD_STAT_OWN: i32 = 0;
const VJD_STAT_FREE: i32 = 1;

struct VJoyApi {
    enabled: VJoyEnabledFn,
    acquire: AcquireVjdFn,
    relinquish: RelinquishVjdFn,
    status: GetVjdStatusFn,
    set_btn: SetBtnFn,
    reset_buttons: ResetButtonsFn,
}

/// One vJoy device, acquired lazily and re-acquired after driver restarts.
pub struct VJoyDevice {
    module: isize,
    api: VJoyApi,
    device_id: u32,
    acquired: bool,
}

/// Resolves a nul-terminated export name to a typed fn pointer.
unsafe fn resolve<F: Copy>(module: HMODULE, export: &'static [u8]) -> Result<F, SinkError> {
    let proc = unsafe { GetProcAddress(module, PCSTR(export.as_ptr())) }.ok_or_else(|| {
        let name = String::from_utf8_lossy(export.strip_suffix(b"\0").unwrap_or(export));
        SinkError::Unavailable(format!("vJoyInterface.dll lacks {}", name))
    })?;
    // Every F is an `extern "C"` fn pointer with the export's signature.
    Ok(unsafe { std::mem::transmute_copy::<_, F>(&proc) })
}

impl VJoyDevice {
    /// Loads the vJoy interface library. The device is acquired on first use.
    pub fn load(device_id: u32) -> Result<Self, SinkError> {
        unsafe {
            let module = LoadLibraryW(w!("vJoyInterface.dll"))
                .map_err(|e| SinkError::Unavailable(format!("vJoyInterface.dll: {}", e)))?;

            let api = (|| -> Result<VJoyApi, SinkError> {
                Ok(VJoyApi {
                    enabled: resolve(module, b"vJoyEnabled\0")?,
                    acquire: resolve(module, b"AcquireVJD\0")?,
                    relinquish: resolve(module, b"RelinquishVJD\0")?,
                    status: resolve(module, b"GetVJDStatus\0")?,
                    set_btn: resolve(module, b"SetBtn\0")?,
                    reset_buttons: resolve(module, b"ResetButtons\0")?,
                })
            })();

            match api {
                Ok(api) => Ok(Self {
                    module: module.0 as isize,
                    api,
                    device_id,
                    acquired: false,
                }),
                Err(e) => {
                    let _ = FreeLibrary(module);
                    Err(e)
                }
            }
        }
    }

    /// Refreshes ownership, acquiring the device when the driver allows it.
    pub fn is_ready(&mut self) -> bool {
        unsafe {
            if (self.api.enabled)() == 0 {
                self.acquired = false;
                return false;
            }
            match (self.api.status)(self.device_id) {
                VJD_STAT_OWN => {
                    self.acquired = true;
                }
                VJD_STAT_FREE => {
                    self.acquired = (self.api.acquire)(self.device_id) != 0;
                    if self.acquired {
                        log::info!("vjoy: acquired device {}", self.device_id);
                        (self.api.reset_buttons)(self.device_id);
                    }
                }
                _ => self.acquired = false,
            }
        }
        self.acquired
    }

    pub fn set_button(&mut self, index: u8, down: bool) -> Result<(), SinkError> {
        if !self.acquired {
            return Err(SinkError::NotAcquired(self.device_id));
        }
        let ok = unsafe { (self.api.set_btn)(down as i32, self.device_id, index) };
        if ok == 0 {
            self.acquired = false;
            return Err(SinkError::Rejected { operation: "SetBtn" });
        }
        Ok(())
    }
}

impl Drop for VJoyDevice {
    fn drop(&mut self) {
        unsafe {
            if self.acquired {
                (self.api.reset_buttons)(self.device_id);
                (self.api.relinquish)(self.device_id);
            }
            let _ = FreeLibrary(HMODULE(self.module as *mut _));
        }
    }
}
