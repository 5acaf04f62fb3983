use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use flate2::read::GzDecoder;
use log::debug;
use tar::{Archive, EntryType};

/// Extracts a tar.gz source archive into `dest`.
///
/// Hosting platforms wrap the tree in a single root folder
/// (`project-main-<sha>/`), which is stripped. Only directories and regular
/// files are written; any entry resolving outside `dest` aborts extraction.
pub fn extract_tar_gz<R: Read>(reader: R, dest: &Path) -> anyhow::Result<()> {
    let mut archive = Archive::new(GzDecoder::new(reader));

    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let path = entry.path().context("Invalid tar entry path")?.into_owned();

        let relative: PathBuf = path.components().skip(1).collect();
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = confined_join(dest, &relative)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target)
                    .with_context(|| format!("Failed to create directory {}", target.display()))?;
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create parent directory for {}", target.display())
                    })?;
                }
                entry
                    .unpack(&target)
                    .with_context(|| format!("Failed to write file {}", target.display()))?;
            }
            other => debug!("Skipping tar entry {} of type {:?}", relative.display(), other),
        }
    }

    Ok(())
}

/// Joins `relative` onto `dest`, refusing anything that climbs out of it.
fn confined_join(dest: &Path, relative: &Path) -> anyhow::Result<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    bail!(
                        "archive entry is trying to write outside of destination directory: {}",
                        relative.display()
                    );
                }
            }
            Component::RootDir | Component::Prefix(_) => bail!(
                "archive entry has an absolute path: {}",
                relative.display()
            ),
        }
    }

    let mut target = dest.to_path_buf();
    target.extend(parts);
    Ok(target)
}
