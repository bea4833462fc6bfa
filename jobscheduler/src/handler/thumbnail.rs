use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{HandlerError, JobHandler};

const DEFAULT_SIZE: u32 = 128;

/// Writes a thumbnail of the image at `input_path` that fits within `width` x `height`
/// (default 128 x 128), keeping the aspect ratio.
///
/// Without an `output_path` the thumbnail is written next to the input as `{stem}_thumb{ext}`.
/// The output format follows the output file's extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailHandler;

impl ThumbnailHandler {
    pub const JOB_TYPE: &'static str = "thumbnail";
}

fn dimension(payload: &Value, key: &str) -> Result<u32, HandlerError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(DEFAULT_SIZE),
        Some(value) => value
            .as_u64()
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value > 0)
            .ok_or_else(|| {
                HandlerError::InvalidPayload(format!("'{key}' must be a positive integer"))
            }),
    }
}

fn default_output_path(input_path: &str) -> String {
    let path = Path::new(input_path);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem}_thumb.{}", ext.to_string_lossy()),
        None => format!("{stem}_thumb"),
    };
    path.with_file_name(file_name).to_string_lossy().into_owned()
}

struct Resized {
    original: (u32, u32),
    thumbnail: (u32, u32),
}

fn resize(
    input_path: &str,
    output_path: &str,
    width: u32,
    height: u32,
) -> Result<Resized, HandlerError> {
    let image = image::open(input_path).map_err(|err| HandlerError::Failed(err.to_string()))?;
    let thumbnail = image.thumbnail(width, height);
    thumbnail
        .save(output_path)
        .map_err(|err| HandlerError::Failed(err.to_string()))?;
    Ok(Resized {
        original: (image.width(), image.height()),
        thumbnail: (thumbnail.width(), thumbnail.height()),
    })
}

#[async_trait]
impl JobHandler for ThumbnailHandler {
    async fn run(&self, payload: Value) -> Result<Value, HandlerError> {
        let input_path = payload
            .get("input_path")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| HandlerError::InvalidPayload("Missing 'input_path' in payload".into()))?
            .to_owned();
        let output_path = payload
            .get("output_path")
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
            .map_or_else(|| default_output_path(&input_path), str::to_owned);
        let width = dimension(&payload, "width")?;
        let height = dimension(&payload, "height")?;

        // Reports a missing input as an I/O error rather than a decode failure.
        tokio::fs::metadata(&input_path).await?;

        // Decoding and resizing are CPU bound.
        let resized = {
            let (input_path, output_path) = (input_path.clone(), output_path.clone());
            tokio::task::spawn_blocking(move || resize(&input_path, &output_path, width, height))
                .await
                .map_err(|err| HandlerError::Failed(format!("Thumbnail task failed: {err}")))??
        };

        Ok(json!({
            "input_path": input_path,
            "output_path": output_path,
            "original_size": [resized.original.0, resized.original.1],
            "thumbnail_size": [resized.thumbnail.0, resized.thumbnail.1],
        }))
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use image::{ImageBuffer, Rgb};

    use super::*;

    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("thumbnail-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn image(&self, name: &str, width: u32, height: u32) -> String {
            let path = self.0.join(name);
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 0]))
                .save(&path)
                .unwrap();
            path.to_str().unwrap().to_owned()
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn default_output_path_adds_a_suffix_before_the_extension() {
        assert_eq!(default_output_path("/data/sample.jpg"), "/data/sample_thumb.jpg");
        assert_eq!(default_output_path("/data/archive.tar.png"), "/data/archive.tar_thumb.png");
        assert_eq!(default_output_path("/data/raw"), "/data/raw_thumb");
    }

    #[tokio::test]
    async fn keeps_the_aspect_ratio() {
        let dir = TempDir::new();
        let input_path = dir.image("wide.png", 400, 200);
        let output_path = dir.0.join("small.png");
        let output_path = output_path.to_str().unwrap();

        let result = ThumbnailHandler
            .run(json!({
                "input_path": input_path,
                "output_path": output_path,
                "width": 100,
                "height": 100,
            }))
            .await
            .unwrap();

        assert_eq!(
            result,
            json!({
                "input_path": input_path,
                "output_path": output_path,
                "original_size": [400, 200],
                "thumbnail_size": [100, 50],
            })
        );
        let written = image::open(output_path).unwrap();
        assert_eq!((written.width(), written.height()), (100, 50));
    }

    #[tokio::test]
    async fn defaults_to_128_pixels_next_to_the_input() {
        let dir = TempDir::new();
        let input_path = dir.image("tall.png", 300, 600);

        let result = ThumbnailHandler
            .run(json!({"input_path": input_path}))
            .await
            .unwrap();

        let expected_output = dir.0.join("tall_thumb.png");
        assert_eq!(result["output_path"], json!(expected_output.to_str().unwrap()));
        assert_eq!(result["thumbnail_size"], json!([64, 128]));
        assert!(expected_output.exists());
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected() {
        assert_matches!(
            ThumbnailHandler.run(json!({})).await,
            Err(HandlerError::InvalidPayload(_))
        );
        assert_matches!(
            ThumbnailHandler
                .run(json!({"input_path": "/data/sample.jpg", "width": 0}))
                .await,
            Err(HandlerError::InvalidPayload(_))
        );
    }

    #[tokio::test]
    async fn missing_image_is_an_io_error() {
        assert_matches!(
            ThumbnailHandler
                .run(json!({"input_path": "/definitely/not/here.png"}))
                .await,
            Err(HandlerError::Io(_))
        );
    }

    #[tokio::test]
    async fn unreadable_image_fails() {
        let dir = TempDir::new();
        let input_path = dir.0.join("notes.png");
        std::fs::write(&input_path, "not an image").unwrap();

        assert_matches!(
            ThumbnailHandler
                .run(json!({"input_path": input_path.to_str().unwrap()}))
                .await,
            Err(HandlerError::Failed(_))
        );
    }
}
