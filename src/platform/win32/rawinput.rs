//! Raw input surface: a message-only window on its own thread.
//!
//! The window thread decodes every `WM_INPUT` record and pushes the result
//! onto the listener's queue. Device classes are registered from the same
//! thread once the window exists.

use std::cell::RefCell;
use std::ffi::c_void;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use windows::Win32::Foundation::*;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::*;
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::{HRESULT, PCWSTR, w};

use super::keyboard::current_modifiers;
use crate::decoder::{DeviceHandle, DeviceInfoCache, DeviceInfoSource, HidDeviceInfo, RawEventDecoder, RawRecord};
use crate::event::InputEvent;
use crate::listener::{DeviceRegistrar, MonitorStatus, RawEventListener, RegistrationError, UsageClass};

const RAWINPUT_WINDOW_CLASS: PCWSTR = w!("PadrouteRawInputWindow");
const WM_INPUT_DEVICE_CHANGE: u32 = 0x00FE;
const GIDC_REMOVAL: usize = 2;
const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;
const ERROR_INVALID_PARAMETER: u32 = 87;

/// Largest record kept on the reusable thread-local buffer.
const MAX_BUFFER_SIZE: usize = 1024;

thread_local! {
    static RECORD_BUFFER: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(MAX_BUFFER_SIZE));
}

static RAW_INPUT_HANDLER: RwLock<Option<Arc<RawInputHandler>>> = RwLock::new(None);

/// HID identity straight from `GetRawInputDeviceInfoW`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32DeviceInfo;

impl DeviceInfoSource for Win32DeviceInfo {
    fn hid_info(&self, device: DeviceHandle) -> Option<HidDeviceInfo> {
        unsafe {
            let mut info = RID_DEVICE_INFO {
                cbSize: std::mem::size_of::<RID_DEVICE_INFO>() as u32,
                ..Default::default()
            };
            let mut size = info.cbSize;
            let result = GetRawInputDeviceInfoW(
                Some(HANDLE(device as *mut c_void)),
                RIDI_DEVICEINFO,
                Some(&mut info as *mut RID_DEVICE_INFO as *mut c_void),
                &mut size,
            );
            if result == 0 || result == u32::MAX || info.dwType != RIM_TYPEHID {
                return None;
            }

            let hid = &info.Anonymous.hid;
            Some(HidDeviceInfo {
                vendor_id: hid.dwVendorId as u16,
                product_id: hid.dwProductId as u16,
                usage_page: hid.usUsagePage,
                usage: hid.usUsage,
                name: None,
            })
        }
    }
}

/// Registers device classes for the surface window.
pub struct Win32Registrar {
    hwnd: isize,
}

impl Win32Registrar {
    fn devices(&self, classes: &[UsageClass], flags: RAWINPUTDEVICE_FLAGS) -> Vec<RAWINPUTDEVICE> {
        let target = if flags.contains(RIDEV_REMOVE) {
            HWND::default()
        } else {
            HWND(self.hwnd as *mut c_void)
        };
        classes
            .iter()
            .map(|class| RAWINPUTDEVICE {
                usUsagePage: class.usage_page,
                usUsage: class.usage.unwrap_or(0),
                dwFlags: if class.usage.is_none() && !flags.contains(RIDEV_REMOVE) {
                    flags | RIDEV_PAGEONLY
                } else {
                    flags
                },
                hwndTarget: target,
            })
            .collect()
    }
}

impl DeviceRegistrar for Win32Registrar {
    fn register(&mut self, classes: &[UsageClass]) -> Result<(), RegistrationError> {
        let devices = self.devices(classes, RIDEV_INPUTSINK | RIDEV_DEVNOTIFY);
        unsafe { RegisterRawInputDevices(&devices, std::mem::size_of::<RAWINPUTDEVICE>() as u32) }
            .map_err(|e| {
                if e.code() == HRESULT::from_win32(ERROR_INVALID_PARAMETER) {
                    RegistrationError::Fatal(e.to_string())
                } else {
                    RegistrationError::Transient(e.to_string())
                }
            })
    }

    fn unregister(&mut self, classes: &[UsageClass]) {
        let devices = self.devices(classes, RIDEV_REMOVE);
        if let Err(e) =
            unsafe { RegisterRawInputDevices(&devices, std::mem::size_of::<RAWINPUTDEVICE>() as u32) }
        {
            log::debug!("listener: device removal failed: {}", e);
        }
    }
}

struct RawInputHandler {
    decoder: RawEventDecoder<DeviceInfoCache<Win32DeviceInfo>>,
    injector: Sender<InputEvent>,
}

impl RawInputHandler {
    /// Processes a WM_INPUT message from the Windows message loop.
    fn handle_raw_input(&self, l_param: LPARAM) {
        let header_size = std::mem::size_of::<RAWINPUTHEADER>() as u32;
        unsafe {
            let mut size = 0u32;
            let result = GetRawInputData(
                HRAWINPUT(l_param.0 as _),
                RID_INPUT,
                None,
                &mut size,
                header_size,
            );
            if result != 0 || (size as usize) < std::mem::size_of::<RAWINPUTHEADER>() {
                return;
            }

            RECORD_BUFFER.with(|buffer| {
                let Ok(mut buffer) = buffer.try_borrow_mut() else {
                    return;
                };
                // RAWINPUT needs pointer alignment; reserve one extra word to align.
                let align = std::mem::align_of::<RAWINPUT>();
                buffer.clear();
                buffer.resize(size as usize + align, 0);
                let offset = buffer.as_ptr().align_offset(align);
                let data = &mut buffer[offset..offset + size as usize];

                let copied = GetRawInputData(
                    HRAWINPUT(l_param.0 as _),
                    RID_INPUT,
                    Some(data.as_mut_ptr() as *mut c_void),
                    &mut size,
                    header_size,
                );
                if copied != size {
                    return;
                }

                let raw = &*(data.as_ptr() as *const RAWINPUT);
                self.dispatch(raw, data);
            });
            if size as usize > MAX_BUFFER_SIZE {
                RECORD_BUFFER.with(|buffer| {
                    if let Ok(mut buffer) = buffer.try_borrow_mut() {
                        buffer.shrink_to(MAX_BUFFER_SIZE);
                    }
                });
            }
        }
    }

    /// Copies the fields the decoder needs out of `raw` and forwards the result.
    fn dispatch(&self, raw: &RAWINPUT, bytes: &[u8]) {
        let device = raw.header.hDevice.0 as DeviceHandle;
        // Union reads follow the header's record type.
        let record = unsafe {
            match raw.header.dwType {
                t if t == RIM_TYPEKEYBOARD.0 => RawRecord::Keyboard {
                    device,
                    vkey: raw.data.keyboard.VKey,
                    flags: raw.data.keyboard.Flags,
                },
                t if t == RIM_TYPEMOUSE.0 => RawRecord::Mouse {
                    device,
                    button_flags: raw.data.mouse.Anonymous.Anonymous.usButtonFlags,
                },
                t if t == RIM_TYPEHID.0 => {
                    let hid = &raw.data.hid;
                    let start = (hid.bRawData.as_ptr() as usize).saturating_sub(bytes.as_ptr() as usize);
                    let report = bytes.get(start..).unwrap_or_default();
                    RawRecord::Hid {
                        device,
                        size_hid: hid.dwSizeHid,
                        count: hid.dwCount,
                        data: report,
                    }
                }
                _ => return,
            }
        };

        let modifiers = current_modifiers();
        let event = match self.decoder.decode(&record, modifiers) {
            Some(event) => InputEvent::Pressed(event),
            None => match self.decoder.decode_release(&record, modifiers) {
                Some(event) => InputEvent::Released(event),
                None => return,
            },
        };
        let _ = self.injector.try_send(event);
    }

    fn device_removed(&self, device: DeviceHandle) {
        self.decoder.devices().invalidate(device);
        log::debug!("listener: device {:#x} removed", device);
    }
}

/// Handle to the raw input window thread.
pub struct RawInputSurface {
    thread_id: u32,
    thread: Option<JoinHandle<()>>,
}

impl RawInputSurface {
    /// Starts the window thread and registers device classes on it.
    ///
    /// Returns once registration has completed or failed; the resulting
    /// status is also visible through [`RawEventListener::status`].
    pub fn start(listener: Arc<RawEventListener>) -> anyhow::Result<(Self, MonitorStatus)> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let thread = thread::Builder::new()
            .name("rawinput_thread".to_string())
            .spawn(move || {
                if let Err(e) = Self::run_message_loop(&listener, &ready_tx) {
                    log::error!("listener: raw input thread error: {}", e);
                    let _ = ready_tx.try_send(Err(e.to_string()));
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok((thread_id, status))) => Ok((
                Self {
                    thread_id,
                    thread: Some(thread),
                },
                status,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(anyhow::anyhow!(e))
            }
            Err(_) => {
                let _ = thread.join();
                Err(anyhow::anyhow!("raw input thread exited before creating its window"))
            }
        }
    }

    fn run_message_loop(
        listener: &RawEventListener,
        ready: &Sender<Result<(u32, MonitorStatus), String>>,
    ) -> anyhow::Result<()> {
        unsafe {
            let h_instance = GetModuleHandleW(None)?;

            let wc = WNDCLASSW {
                lpfnWndProc: Some(Self::window_proc),
                hInstance: HINSTANCE(h_instance.0),
                lpszClassName: RAWINPUT_WINDOW_CLASS,
                ..Default::default()
            };

            if RegisterClassW(&wc) == 0 {
                let last_error = GetLastError();
                if last_error.0 != ERROR_CLASS_ALREADY_EXISTS {
                    anyhow::bail!("Failed to register window class: {:?}", last_error);
                }
            }

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE(0),
                RAWINPUT_WINDOW_CLASS,
                w!("Padroute Raw Input Window"),
                WINDOW_STYLE(0),
                0,
                0,
                0,
                0,
                Some(HWND_MESSAGE),
                None,
                Some(HINSTANCE(h_instance.0)),
                None,
            )?;

            let handler = Arc::new(RawInputHandler {
                decoder: RawEventDecoder::new(DeviceInfoCache::new(Win32DeviceInfo)),
                injector: listener.injector(),
            });
            *RAW_INPUT_HANDLER.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);

            let status = listener.on_surface_ready(Box::new(Win32Registrar {
                hwnd: hwnd.0 as isize,
            }));
            let _ = ready.send(Ok((GetCurrentThreadId(), status)));

            let mut msg = MSG::default();
            loop {
                let result = GetMessageW(&mut msg, None, 0, 0);
                if result.0 == 0 || result.0 == -1 {
                    break;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            *RAW_INPUT_HANDLER.write().unwrap_or_else(PoisonError::into_inner) = None;
            let _ = DestroyWindow(hwnd);
            UnregisterClassW(RAWINPUT_WINDOW_CLASS, Some(HINSTANCE(h_instance.0)))?;
        }

        Ok(())
    }

    unsafe extern "system" fn window_proc(
        hwnd: HWND,
        msg: u32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_INPUT => {
                if let Ok(slot) = RAW_INPUT_HANDLER.try_read()
                    && let Some(handler) = slot.as_ref()
                {
                    handler.handle_raw_input(l_param);
                }
                unsafe { DefWindowProcW(hwnd, msg, w_param, l_param) }
            }
            WM_INPUT_DEVICE_CHANGE => {
                if w_param.0 == GIDC_REMOVAL
                    && let Ok(slot) = RAW_INPUT_HANDLER.try_read()
                    && let Some(handler) = slot.as_ref()
                {
                    handler.device_removed(l_param.0 as DeviceHandle);
                }
                unsafe { DefWindowProcW(hwnd, msg, w_param, l_param) }
            }
            WM_CLOSE | WM_DESTROY => unsafe {
                PostQuitMessage(0);
                LRESULT(0)
            },
            _ => unsafe { DefWindowProcW(hwnd, msg, w_param, l_param) },
        }
    }

    /// Stops the window thread. Idempotent.
    pub fn stop(&mut self) {
        if self.thread_id != 0 {
            unsafe {
                let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
            }
            self.thread_id = 0;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RawInputSurface {
    fn drop(&mut self) {
        self.stop();
    }
}
