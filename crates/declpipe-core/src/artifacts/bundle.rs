//! Python dependency bundles.
//!
//! Dependencies from the requirements file are installed into
//! `libs/lib/python<v>/site-packages` and zipped as
//! `environment-python<v>.zip`. A blake3 stamp of the requirements file sits
//! next to the archive; a matching stamp means the archive is reused as is.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::{DeployError, Result};
use crate::exec::{CommandRunner, Invocation, check_output};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub python_version: String,
    pub archive: PathBuf,
    /// Import path of the installed packages, relative to the archive root.
    pub python_path: String,
    pub reused: bool,
}

impl Bundle {
    pub fn archive_name(&self) -> String {
        archive_name(&self.python_version)
    }
}

pub fn archive_name(python_version: &str) -> String {
    format!("environment-python{python_version}.zip")
}

pub fn site_packages(python_version: &str) -> String {
    format!("libs/lib/python{python_version}/site-packages")
}

pub struct DependencyBundler<'a> {
    runner: &'a dyn CommandRunner,
    requirements: PathBuf,
    output_dir: PathBuf,
}

impl<'a> DependencyBundler<'a> {
    pub fn new(runner: &'a dyn CommandRunner, requirements: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            runner,
            requirements,
            output_dir,
        }
    }

    pub fn archive_path(&self, python_version: &str) -> PathBuf {
        self.output_dir.join(archive_name(python_version))
    }

    fn stamp_path(&self, python_version: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.blake3", archive_name(python_version)))
    }

    /// Build (or reuse) the bundle for one python version.
    pub fn build(&self, python_version: &str) -> Result<Bundle> {
        self.build_inner(python_version)
            .map_err(|e| DeployError::Bundle {
                version: python_version.to_string(),
                message: format!("{e:#}"),
            })
    }

    fn build_inner(&self, python_version: &str) -> anyhow::Result<Bundle> {
        let requirements = fs::read(&self.requirements).with_context(|| {
            format!("Failed to read requirements: {}", self.requirements.display())
        })?;
        let stamp = blake3::hash(&requirements).to_hex().to_string();
        let archive = self.archive_path(python_version);
        let stamp_path = self.stamp_path(python_version);

        let bundle = Bundle {
            python_version: python_version.to_string(),
            archive: archive.clone(),
            python_path: format!("./{}", site_packages(python_version)),
            reused: false,
        };

        if archive.exists()
            && fs::read_to_string(&stamp_path).is_ok_and(|existing| existing.trim() == stamp)
        {
            tracing::info!(python = python_version, "reusing dependency bundle");
            return Ok(Bundle {
                reused: true,
                ..bundle
            });
        }

        let staging = self.output_dir.join(format!("python{python_version}"));
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("Failed to clear {}", staging.display()))?;
        }
        let target = staging.join(site_packages(python_version));
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;

        tracing::info!(python = python_version, "installing bundle dependencies");
        check_output(
            self.runner,
            &Invocation::new(format!("python{python_version}"))
                .args(["-m", "pip", "install", "--quiet", "--requirement"])
                .arg(self.requirements.display().to_string())
                .arg("--target")
                .arg(target.display().to_string()),
        )?;

        zip_dir(&staging, &archive)?;
        fs::write(&stamp_path, &stamp)
            .with_context(|| format!("Failed to write {}", stamp_path.display()))?;
        Ok(bundle)
    }
}

/// Zip the contents of `src` into `dest`, entries sorted and timestamps fixed.
fn zip_dir(src: &Path, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file =
        File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut files = Vec::new();
    collect_files(src, "", &mut files)?;
    for (name, path) in files {
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("Failed to add {name} to archive"))?;
        let content =
            fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        zip.write_all(&content)
            .with_context(|| format!("Failed to write {name} to archive"))?;
    }
    zip.finish().context("Failed to finish archive")?;
    Ok(())
}

fn collect_files(dir: &Path, base: &str, out: &mut Vec<(String, PathBuf)>) -> anyhow::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read directory entries: {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let rel = if base.is_empty() {
            name
        } else {
            format!("{base}/{name}")
        };
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, &rel, out)?;
        } else {
            out.push((rel, path));
        }
    }
    Ok(())
}
