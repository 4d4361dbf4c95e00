//! Contains logic for asking the operating system which application is
//! frontmost. [GenericWorkspace] is the main artifact of this module that
//! abstracts the per-platform backends.

#[cfg(feature = "win")]
pub mod win;
#[cfg(feature = "x11")]
pub mod x11;

#[cfg(feature = "win")]
extern crate windows;

#[cfg(feature = "x11")]
extern crate xcb;

use anyhow::Result;

/// The best available human-readable identity of an application. For example
/// 'Firefox' or 'nvim'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
}

/// Intended to serve as a contract the per-platform backends must implement.
#[cfg_attr(test, mockall::automock)]
pub trait Workspace {
    /// Returns the frontmost application, or `None` when no regular window
    /// has focus.
    fn frontmost_application(&mut self) -> Result<Option<AppInfo>>;
}

/// Serves as a cross-compatible Workspace implementation.
pub struct GenericWorkspace {
    inner: Box<dyn Workspace>,
}

impl GenericWorkspace {
    pub fn new() -> Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "win")] {
                use win::WindowsWorkspace;
                Ok(Self {
                    inner: Box::new(WindowsWorkspace::new()),
                })
            }
            else if #[cfg(feature = "x11")] {
                use x11::X11Workspace;
                Ok(Self {
                    inner: Box::new(X11Workspace::new()?),
                })
            }
            else {
                // This runtime error is needed to allow the project to be compiled for during testing.
                unimplemented!("No workspace backend was specified")
            }
        }
    }
}

impl Workspace for GenericWorkspace {
    fn frontmost_application(&mut self) -> Result<Option<AppInfo>> {
        self.inner.frontmost_application()
    }
}
