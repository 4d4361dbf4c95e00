use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::error;
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{CloseHandle, GetLastError, BOOL, HANDLE},
        System::{
            Diagnostics::Debug::{
                FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
            },
            SystemServices::{LANG_ENGLISH, SUBLANG_ENGLISH_US},
            Threading::{
                OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
                PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
            },
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId},
    },
};

use super::{AppInfo, Workspace};

#[tracing::instrument]
pub fn get_frontmost() -> Result<Option<AppInfo>> {
    let window = unsafe { GetForegroundWindow() };

    if window.is_invalid() {
        // Nothing has focus, for example right after a desktop switch.
        return Ok(None);
    }

    let mut id = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut id)) };
    if id == 0 {
        return Err(last_error("Failed to resolve the foreground process"));
    }

    let process_handle = unsafe {
        OpenProcess(
            PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
            BOOL::from(false),
            id,
        )
    }
    .inspect_err(|e| error!("Failed to open process {e:?}"))?;

    let mut text: [u16; 4096] = [0; 4096];
    let image_path = unsafe { get_process_image_path(process_handle, &mut text) };

    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;

    Ok(Some(AppInfo {
        name: image_path_to_name(&image_path?),
    }))
}

/// The log records a human-readable application name, so the executable stem
/// stands in for it, 'C:\...\firefox.exe' becoming 'firefox'.
fn image_path_to_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|v| v.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn last_error(context: &str) -> anyhow::Error {
    let err = unsafe { GetLastError() };
    let mut message_buffer = [0u16; 2048];
    let size = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            err.0,
            LANG_ENGLISH | (SUBLANG_ENGLISH_US << 10),
            PWSTR::from_raw(message_buffer.as_mut_ptr()),
            2048,
            None,
        )
    };
    if size == 0 {
        anyhow!("{context}")
    } else {
        let details = String::from_utf16_lossy(&message_buffer[0..size as usize]);
        anyhow!("{context}: {details}")
    }
}

unsafe fn get_process_image_path(window_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            window_handle,
            PROCESS_NAME_WIN32,
            PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

pub struct WindowsWorkspace {}

impl WindowsWorkspace {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for WindowsWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace for WindowsWorkspace {
    fn frontmost_application(&mut self) -> Result<Option<AppInfo>> {
        get_frontmost().inspect_err(|e| error!("Failed to get foreground application {e:?}"))
    }
}
