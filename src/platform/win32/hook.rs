//! `WH_KEYBOARD_LL` hook thread driving an [`InterceptorCore`].
//!
//! Low-level hook procs receive no user pointer, so the active core lives in
//! a process-global slot. The proc only ever `try_read`s that slot: if a
//! writer holds it the key passes through instead of stalling the OS.

use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use windows::Win32::Foundation::*;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::*;

use super::keyboard::{SIMULATED_EVENT_MARKER, current_modifiers};
use crate::interceptor::{HookError, InterceptorCore, KeyHook, KeyTransition};

static HOOK_CORE: RwLock<Option<Arc<InterceptorCore>>> = RwLock::new(None);

#[derive(Default)]
pub struct Win32KeyHook {
    thread_id: u32,
    thread: Option<JoinHandle<()>>,
}

impl Win32KeyHook {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_core(core: Option<Arc<InterceptorCore>>) {
        *HOOK_CORE.write().unwrap_or_else(PoisonError::into_inner) = core;
    }

    unsafe extern "system" fn keyboard_proc(
        code: i32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        if code < 0 {
            return unsafe { CallNextHookEx(None, code, w_param, l_param) };
        }

        let kb_struct = unsafe { &*(l_param.0 as *const KBDLLHOOKSTRUCT) };

        let is_down = match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => true,
            WM_KEYUP | WM_SYSKEYUP => false,
            _ => return unsafe { CallNextHookEx(None, code, w_param, l_param) },
        };

        let transition = KeyTransition {
            vk: kb_struct.vkCode,
            is_down,
            injected: (kb_struct.flags.0 & LLKHF_INJECTED.0) != 0
                || kb_struct.dwExtraInfo == SIMULATED_EVENT_MARKER,
        };

        let swallow = match HOOK_CORE.try_read() {
            Ok(slot) => slot
                .as_ref()
                .is_some_and(|core| core.on_transition(transition, current_modifiers())),
            Err(_) => false,
        };

        if swallow {
            return LRESULT(1);
        }
        unsafe { CallNextHookEx(None, code, w_param, l_param) }
    }

    fn run_message_loop(ready: crossbeam_channel::Sender<Result<u32, HookError>>) {
        unsafe {
            // Force create message queue
            let mut msg = MSG::default();
            let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);

            let hook = match SetWindowsHookExW(WH_KEYBOARD_LL, Some(Self::keyboard_proc), None, 0) {
                Ok(hook) if !hook.0.is_null() => hook,
                Ok(_) => {
                    let _ = ready.send(Err(HookError::Install("null hook handle".to_string())));
                    return;
                }
                Err(e) => {
                    let _ = ready.send(Err(HookError::Install(e.to_string())));
                    return;
                }
            };

            let _ = ready.send(Ok(GetCurrentThreadId()));

            loop {
                let result = GetMessageW(&mut msg, None, 0, 0);
                if result.0 == 0 || result.0 == -1 {
                    break;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            let _ = UnhookWindowsHookEx(hook);
        }
        log::debug!("hook: message loop exited");
    }
}

impl KeyHook for Win32KeyHook {
    fn install(&mut self, core: Arc<InterceptorCore>) -> Result<(), HookError> {
        Self::set_core(Some(core));

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let thread = thread::Builder::new()
            .name("keyboard_hook".to_string())
            .spawn(move || Self::run_message_loop(ready_tx))
            .map_err(|e| HookError::Install(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                self.thread_id = thread_id;
                self.thread = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                Self::set_core(None);
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                Self::set_core(None);
                Err(HookError::ThreadExited)
            }
        }
    }

    fn uninstall(&mut self) {
        if self.thread_id != 0 {
            unsafe {
                let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
            }
            self.thread_id = 0;
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Self::set_core(None);
    }
}

impl Drop for Win32KeyHook {
    fn drop(&mut self) {
        self.uninstall();
    }
}
