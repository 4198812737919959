// Window surface - platform glue between winit and Vulkan
//
// Maps raw window/display handles onto the matching VK_KHR_*_surface
// extension. Only the platforms the renderer is tested on are supported.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_void, CStr};

/// Instance extensions needed to create a surface for this display
pub fn required_extensions(display_handle: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display_handle {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };

    Ok(vec![khr::Surface::name(), platform])
}

/// Create a surface for a window.
///
/// # Safety
/// The handles must stay valid for the lifetime of the returned surface,
/// and `instance` must have been created with [`required_extensions`].
pub unsafe fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = match (display_handle, window_handle) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const c_void;
            let hwnd = handle.hwnd.get() as *const c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }

        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .context("Xlib display handle has no display pointer")?
                .as_ptr();
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(window.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }

        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display
                .connection
                .context("XCB display handle has no connection pointer")?
                .as_ptr();
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection)
                .window(window.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }

        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(window.surface.as_ptr());
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }

        (display, window) => {
            anyhow::bail!("Unsupported window handle pair: {:?} / {:?}", display, window)
        }
    };

    surface.context("Failed to create window surface")
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        AppKitDisplayHandle, WaylandDisplayHandle, WindowsDisplayHandle, XlibDisplayHandle,
    };
    use std::ptr::NonNull;

    #[test]
    fn windows_needs_win32_surface() {
        let exts = required_extensions(RawDisplayHandle::Windows(WindowsDisplayHandle::new()))
            .unwrap();
        assert_eq!(exts, vec![khr::Surface::name(), khr::Win32Surface::name()]);
    }

    #[test]
    fn x11_and_wayland_map_to_their_extensions() {
        let xlib = required_extensions(RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)))
            .unwrap();
        assert_eq!(xlib[1], khr::XlibSurface::name());

        let wayland = required_extensions(RawDisplayHandle::Wayland(
            WaylandDisplayHandle::new(NonNull::dangling()),
        ))
        .unwrap();
        assert_eq!(wayland[1], khr::WaylandSurface::name());
    }

    #[test]
    fn surface_extension_is_always_first() {
        let exts = required_extensions(RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)))
            .unwrap();
        assert_eq!(exts[0], khr::Surface::name());
        assert_eq!(exts.len(), 2);
    }

    #[test]
    fn unsupported_platform_is_rejected() {
        let result = required_extensions(RawDisplayHandle::AppKit(AppKitDisplayHandle::new()));
        assert!(result.is_err());
    }
}
