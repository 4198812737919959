// Shader module loading and hot reload
//
// Shaders are compiled to SPIR-V by build.rs and read from disk at
// startup, so an edited shader can be picked up without a rebuild.

use anyhow::{Context, Result};
use ash::vk;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into words, checking the magic number and alignment
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V")?;
    if words.first() != Some(&SPIRV_MAGIC) {
        anyhow::bail!("Invalid SPIR-V: bad magic number");
    }
    Ok(words)
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read shader {:?}", path))?;
    let code = parse_spirv(&bytes).with_context(|| format!("Failed to parse shader {:?}", path))?;

    log::debug!("Loaded shader {:?} ({} words)", path, code.len());
    create_shader_module(device, &code)
}

/// Watches shader files and reports when any of them changes
pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    paths: Vec<PathBuf>,
}

impl ShaderWatcher {
    pub fn new(paths: &[PathBuf]) -> Result<Self> {
        let (tx, events) = channel();

        let mut watcher = notify::recommended_watcher(move |event| {
            // The receiver is gone once the renderer shuts down
            let _ = tx.send(event);
        })
        .context("Failed to create shader watcher")?;

        for path in paths {
            // Watch the parent directory; editors often replace files on save
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {:?}", dir))?;
        }

        log::info!("Watching {} shader file(s) for changes", paths.len());

        Ok(Self {
            _watcher: watcher,
            events,
            paths: paths.iter().map(|p| normalize(p)).collect(),
        })
    }

    /// Drain pending events; true when a watched shader was modified
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        for event in self.events.try_iter() {
            match event {
                Ok(event) if is_relevant(&event, &self.paths) => {
                    log::info!("Shader changed: {:?}", event.paths);
                    changed = true;
                }
                Ok(_) => {}
                Err(e) => log::warn!("Shader watch error: {}", e),
            }
        }
        changed
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn is_relevant(event: &Event, watched: &[PathBuf]) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| watched.contains(&normalize(p)) || watched.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn spirv_magic_is_accepted() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
        assert_eq!(parse_spirv(&bytes).unwrap(), words);
    }

    #[test]
    fn misaligned_or_foreign_bytes_are_rejected() {
        assert!(parse_spirv(&[0x03, 0x02, 0x23]).is_err());
        assert!(parse_spirv(b"#version 450").is_err());
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn only_writes_to_watched_files_count() {
        let watched = vec![PathBuf::from("shaders/pyramid.frag.spv")];

        let modify = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("shaders/pyramid.frag.spv"));
        assert!(is_relevant(&modify, &watched));

        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("shaders/pyramid.frag.spv"));
        assert!(is_relevant(&create, &watched));

        let other = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("shaders/pyramid.frag"));
        assert!(!is_relevant(&other, &watched));

        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("shaders/pyramid.frag.spv"));
        assert!(!is_relevant(&access, &watched));
    }
}
