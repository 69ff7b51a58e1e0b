use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Packs `dir` into a sibling `<dir>.zip`, rooted at the directory's name.
pub fn write_zip(dir: &Path) -> Result<PathBuf> {
    let root = dir
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .with_context(|| format!("cannot name a zip after {}", dir.display()))?;
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let zip_path = parent.join(format!("{}.zip", root));
    let tmp_path = parent.join(format!("{}.zip.tmp", root));

    let file = File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let result = write_zip_entries(&mut zip, dir, &root);

    match result.and_then(|_| zip.finish().with_context(|| "failed to finalize zip")) {
        Ok(_) => {
            fs::rename(&tmp_path, &zip_path)
                .with_context(|| format!("failed to move zip to {}", zip_path.display()))?;
            Ok(zip_path)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn write_zip_entries(zip: &mut ZipWriter<File>, dir: &Path, root: &str) -> Result<()> {
    // Fixed 1980-01-01 timestamps keep archives byte-identical across runs.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    zip.add_directory(format!("{}/", root), options)
        .with_context(|| "failed to add directory entry to zip")?;
    add_dir(zip, dir, root, options)
}

fn add_dir(
    zip: &mut ZipWriter<File>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("failed to list {}", dir.display()))?;
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let zip_name = format!("{}/{}", prefix, name);
        if path.is_dir() {
            zip.add_directory(format!("{}/", zip_name), options)
                .with_context(|| format!("failed to add {} to zip", zip_name))?;
            add_dir(zip, &path, &zip_name, options)?;
        } else {
            add_file(zip, &path, &zip_name, options)
                .with_context(|| format!("failed to add {} to zip", zip_name))?;
        }
    }
    Ok(())
}

fn add_file(
    zip: &mut ZipWriter<File>,
    src_path: &Path,
    zip_path: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut file =
        File::open(src_path).with_context(|| format!("failed to open {}", src_path.display()))?;
    zip.start_file(zip_path, options)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        zip.write_all(&buf[..n])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::ZipArchive;

    #[test]
    fn bundles_nested_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("hist");
        fs::create_dir_all(out.join("real")).unwrap();
        fs::create_dir_all(out.join("interp")).unwrap();
        fs::write(out.join("real/0.tsv"), "1\t2\n").unwrap();
        fs::write(out.join("interp/0.tsv"), "1\t2.000000\n").unwrap();

        let zip_path = write_zip(&out).unwrap();
        assert_eq!(zip_path, dir.path().join("hist.zip"));
        assert!(!dir.path().join("hist.zip.tmp").exists());

        let mut archive = ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut body = String::new();
        archive
            .by_name("hist/real/0.tsv")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "1\t2\n");
        assert!(archive.by_name("hist/interp/0.tsv").is_ok());
    }
}
