// Window surface creation
//
// Maps raw window handles onto the platform surface extensions. Only the
// platforms winit hands us on desktop are covered.

use anyhow::{bail, Context, Result};
use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;

/// Instance extensions needed to present to `display`
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => bail!("Unsupported display handle: {:?}", other),
    };
    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

/// Create a presentation surface for a native window
///
/// # Safety
/// The handles must refer to a live window that outlives the surface.
pub unsafe fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(window.hinstance.map_or(0, |h| h.get()) as vk::HINSTANCE)
                .hwnd(window.hwnd.get() as vk::HWND);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }

        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .context("Xlib display handle has no display")?
                .as_ptr();
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.cast())
                .window(window.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }

        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display
                .connection
                .context("XCB display handle has no connection")?
                .as_ptr();
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.cast())
                .window(window.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }

        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr().cast())
                .surface(window.surface.as_ptr().cast());
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }

        (display, window) => bail!("Unsupported window handles: {:?} / {:?}", display, window),
    };

    surface.context("Failed to create window surface")
}
