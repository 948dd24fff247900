use anyhow::{bail, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_DIR_NAME: &str = "yolo_counter";

/// Resolve the model file, downloading it into the user cache on first use.
///
/// A file at `path` always wins. Otherwise the cached copy named after `path`'s
/// file name is used, and only if that is missing too is `url` fetched.
pub fn ensure_model(path: &Path, url: Option<&str>) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let cache_dir = dirs::cache_dir()
        .context("no user cache directory on this platform")?
        .join(CACHE_DIR_NAME);
    ensure_model_in(path, url, &cache_dir)
}

fn ensure_model_in(path: &Path, url: Option<&str>, cache_dir: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("model path {} has no file name", path.display()))?;
    let cached = cache_dir.join(file_name);
    if cached.is_file() {
        log::info!("using cached model {}", cached.display());
        return Ok(cached);
    }

    let Some(url) = url else {
        bail!(
            "model {} not found and no model_url configured",
            path.display()
        );
    };

    fs::create_dir_all(cache_dir)
        .with_context(|| format!("create cache dir {}", cache_dir.display()))?;
    download(url, &cached)?;
    Ok(cached)
}

fn download(url: &str, dest: &Path) -> Result<()> {
    log::info!("downloading {} -> {}", url, dest.display());
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch {}", url))?;

    // 先写临时文件, 完成后再改名
    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial)
        .with_context(|| format!("create {}", partial.display()))?;
    let written = io::copy(&mut response.into_reader(), &mut file)
        .with_context(|| format!("write {}", partial.display()))?;
    drop(file);
    fs::rename(&partial, dest).with_context(|| format!("rename to {}", dest.display()))?;

    log::info!("downloaded {} bytes", written);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_model_short_circuits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = dir.path().join("yolov8s.onnx");
        fs::write(&model, b"onnx")?;

        let resolved = ensure_model_in(&model, None, &dir.path().join("cache"))?;
        assert_eq!(resolved, model);
        Ok(())
    }

    #[test]
    fn cached_model_is_reused() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache)?;
        fs::write(cache.join("yolov8s.onnx"), b"onnx")?;

        let resolved = ensure_model_in(
            &dir.path().join("missing/yolov8s.onnx"),
            Some("http://127.0.0.1:9/unused"),
            &cache,
        )?;
        assert_eq!(resolved, cache.join("yolov8s.onnx"));
        Ok(())
    }

    #[test]
    fn missing_model_without_url_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_model_in(&dir.path().join("nope.onnx"), None, &dir.path().join("cache"))
            .unwrap_err();
        assert!(err.to_string().contains("no model_url"));
    }
}
