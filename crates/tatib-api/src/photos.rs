use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use tatib_types::api::{
    Claims, PhotoDataRequest, PhotoValidation, ThumbnailResponse, UploadPhotoRequest,
    UploadPhotoResponse,
};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Decoded payload ceiling for evidence photos.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Payloads at or under this size are returned as their own thumbnail.
pub const THUMBNAIL_MAX_BYTES: usize = 200 * 1024;

const SUPPORTED_FORMATS: &[&str] = &["jpeg", "jpg", "png", "gif"];

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Public path prefix under which stored photos are served.
pub const PUBLIC_PREFIX: &str = "/uploads";

/// An image pulled out of a `data:image/<format>;base64,<payload>` URL.
#[derive(Debug)]
pub struct DecodedImage {
    pub format: String,
    pub bytes: Vec<u8>,
}

/// Parse and check a data URL. The error string says which check failed.
pub fn decode_data_url(data: &str) -> Result<DecodedImage, String> {
    let (format, payload) = data
        .trim()
        .strip_prefix("data:image/")
        .and_then(|rest| rest.split_once(";base64,"))
        .ok_or_else(|| {
            "Invalid image data format: expected data:image/<format>;base64,<data>".to_string()
        })?;

    let format = format.to_ascii_lowercase();
    if !SUPPORTED_FORMATS.contains(&format.as_str()) {
        return Err(format!(
            "Unsupported image format: {}. Allowed formats: {}",
            format,
            SUPPORTED_FORMATS.join(", ")
        ));
    }

    let bytes = B64
        .decode(payload.trim())
        .map_err(|e| format!("Invalid base64 encoding: {}", e))?;

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(format!(
            "Image size exceeds 5MB limit ({} bytes)",
            bytes.len()
        ));
    }

    if !has_signature(&format, &bytes) {
        return Err(format!("Corrupt image header: data is not a valid {} image", format));
    }

    Ok(DecodedImage { format, bytes })
}

fn has_signature(format: &str, bytes: &[u8]) -> bool {
    match format {
        "jpeg" | "jpg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        "png" => bytes.starts_with(&PNG_SIGNATURE),
        "gif" => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
        _ => false,
    }
}

pub fn validate_format(data: &str) -> PhotoValidation {
    match decode_data_url(data) {
        Ok(image) => PhotoValidation {
            valid: true,
            format: Some(image.format),
            error: None,
        },
        Err(error) => PhotoValidation {
            valid: false,
            format: None,
            error: Some(error),
        },
    }
}

/// Placeholder thumbnailer: small images pass through untouched, larger ones
/// keep only their first `THUMBNAIL_MAX_BYTES` bytes. No pixel resampling.
pub fn thumbnail(data: &str) -> AppResult<String> {
    let image = decode_data_url(data).map_err(AppError::InvalidInput)?;
    if image.bytes.len() <= THUMBNAIL_MAX_BYTES {
        return Ok(data.to_string());
    }
    Ok(format!(
        "data:image/{};base64,{}",
        image.format,
        B64.encode(&image.bytes[..THUMBNAIL_MAX_BYTES])
    ))
}

/// Stored names live in one flat directory, so anything that could climb
/// out of it or name a subdirectory is refused.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Reduce a client-supplied name to a safe stem: last path segment, no
/// extension, `[A-Za-z0-9_-]` only.
fn sanitize_stem(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let stem = match base.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => base,
    };
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "photo".to_string()
    } else {
        cleaned
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Manages on-disk evidence photos.
///
/// Each photo is a single flat file at `{dir}/{epoch_ms}_{stem}.{format}`.
/// The millisecond stamp is forced to increase on every upload so two
/// uploads never share a name.
pub struct PhotoStore {
    dir: PathBuf,
    last_stamp: AtomicI64,
}

impl PhotoStore {
    pub async fn new(dir: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Photo storage directory: {}", dir.display());
        Ok(Self {
            dir,
            last_stamp: AtomicI64::new(0),
        })
    }

    /// Path to the file for a given stored name.
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    pub async fn upload(&self, req: &UploadPhotoRequest) -> AppResult<UploadPhotoResponse> {
        let image = decode_data_url(&req.file_data).map_err(AppError::InvalidInput)?;
        let stem = sanitize_stem(&req.file_name);

        loop {
            let file_name = format!("{}_{}.{}", self.next_stamp(), stem, image.format);
            let path = self.file_path(&file_name);
            let file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => file,
                // left over from an earlier process in the same millisecond
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(anyhow::anyhow!("failed to create {}: {}", path.display(), e).into());
                }
            };
            write_or_discard(&path, file, &image.bytes).await?;

            info!("Stored photo {} ({} bytes)", file_name, image.bytes.len());
            return Ok(UploadPhotoResponse {
                url: format!("{}/{}", PUBLIC_PREFIX, file_name),
                file_name,
            });
        }
    }

    /// Stored bytes, or `None` for a malformed or unknown name.
    pub async fn get(&self, file_name: &str) -> AppResult<Option<Vec<u8>>> {
        if !is_safe_file_name(file_name) {
            warn!("Refused photo read for unsafe name {:?}", file_name);
            return Ok(None);
        }
        match fs::read(self.file_path(file_name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!("failed to read photo {}: {}", file_name, e).into()),
        }
    }

    /// Delete a stored photo. A malformed name is an error; a missing file
    /// is not.
    pub async fn delete(&self, file_name: &str) -> AppResult<()> {
        if !is_safe_file_name(file_name) {
            return Err(AppError::InvalidInput(format!("Invalid file name: {}", file_name)));
        }
        match fs::remove_file(self.file_path(file_name)).await {
            Ok(()) => {
                info!("Deleted photo {}", file_name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Photo {} already gone", file_name);
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("failed to delete photo {}: {}", file_name, e).into()),
        }
    }
}

/// Write all of `bytes` into a freshly created file. On failure the partial
/// file at `path` is removed so it can never be served.
async fn write_or_discard<W>(path: &std::path::Path, mut file: W, bytes: &[u8]) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    let written = match file.write_all(bytes).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    let Err(e) = written else {
        return Ok(());
    };

    drop(file);
    if let Err(remove_err) = fs::remove_file(path).await {
        warn!("Failed to remove partial photo {}: {}", path.display(), remove_err);
    }
    Err(anyhow::anyhow!("failed to write {}: {}", path.display(), e).into())
}

// -- Handlers --

/// POST /photos: store a data-URL image, returns { url, file_name }.
pub async fn upload_photo(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<UploadPhotoRequest>,
) -> AppResult<impl IntoResponse> {
    let stored = state.photos.upload(&req).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn validate_photo(
    Extension(_claims): Extension<Claims>,
    Json(req): Json<PhotoDataRequest>,
) -> impl IntoResponse {
    Json(validate_format(&req.file_data))
}

pub async fn thumbnail_photo(
    Extension(_claims): Extension<Claims>,
    Json(req): Json<PhotoDataRequest>,
) -> AppResult<impl IntoResponse> {
    let file_data = thumbnail(&req.file_data)?;
    Ok(Json(ThumbnailResponse { file_data }))
}

/// GET /uploads/{file_name} is public so links in parent messages resolve.
pub async fn serve_photo(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let bytes = state
        .photos
        .get(&file_name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Photo not found: {}", file_name)))?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&file_name))], bytes))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    Extension(_claims): Extension<Claims>,
) -> AppResult<impl IntoResponse> {
    state.photos.delete(&file_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_url(format: &str, bytes: &[u8]) -> String {
        format!("data:image/{};base64,{}", format, B64.encode(bytes))
    }

    fn jpeg(len: usize) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.resize(len.max(4), 0x11);
        bytes
    }

    #[test]
    fn accepts_known_formats() {
        assert_eq!(validate_format(&data_url("jpeg", &jpeg(64))).format.as_deref(), Some("jpeg"));
        assert!(validate_format(&data_url("jpg", &jpeg(64))).valid);
        assert!(validate_format(&data_url("PNG", &PNG_SIGNATURE)).valid);
        assert!(validate_format(&data_url("gif", b"GIF89a....")).valid);
        assert!(validate_format(&data_url("gif", b"GIF87a....")).valid);
    }

    #[test]
    fn distinguishes_failure_kinds() {
        let not_url = validate_format("hello");
        assert!(!not_url.valid);
        assert!(not_url.error.unwrap().contains("Invalid image data format"));

        let bmp = validate_format(&data_url("bmp", b"BM...."));
        assert!(bmp.error.unwrap().contains("Unsupported image format"));

        let bad_b64 = validate_format("data:image/png;base64,@@@not-base64@@@");
        assert!(bad_b64.error.unwrap().contains("Invalid base64"));

        let huge = validate_format(&data_url("jpeg", &jpeg(MAX_IMAGE_BYTES + 1)));
        assert!(huge.error.unwrap().contains("5MB limit"));

        let mislabeled = validate_format(&data_url("png", &jpeg(64)));
        assert!(mislabeled.error.unwrap().contains("Corrupt image header"));
    }

    #[test]
    fn exactly_at_limit_is_accepted() {
        assert!(validate_format(&data_url("jpeg", &jpeg(MAX_IMAGE_BYTES))).valid);
    }

    #[test]
    fn thumbnail_passes_small_images_through() {
        let small = data_url("jpeg", &jpeg(1024));
        assert_eq!(thumbnail(&small).unwrap(), small);
    }

    #[test]
    fn thumbnail_truncates_large_images() {
        let large = data_url("png", &{
            let mut b = PNG_SIGNATURE.to_vec();
            b.resize(THUMBNAIL_MAX_BYTES * 2, 0);
            b
        });
        let thumb = thumbnail(&large).unwrap();
        let decoded = decode_data_url(&thumb).unwrap();
        assert_eq!(decoded.format, "png");
        assert_eq!(decoded.bytes.len(), THUMBNAIL_MAX_BYTES);

        assert!(matches!(thumbnail("nope"), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn unsafe_names_rejected() {
        for name in ["", "..", "../etc/passwd", "a/b.png", "a\\b.png", "x..y.png"] {
            assert!(!is_safe_file_name(name), "{:?}", name);
        }
        assert!(is_safe_file_name("1705301400000_bukti.jpeg"));
    }

    #[test]
    fn stems_are_sanitized() {
        assert_eq!(sanitize_stem("bukti pelanggaran.jpg"), "bukti_pelanggaran");
        assert_eq!(sanitize_stem("C:\\foto\\kantin.png"), "kantin");
        assert_eq!(sanitize_stem("../../x"), "x");
        assert_eq!(sanitize_stem("..."), "photo");
        assert_eq!(sanitize_stem(".hidden"), "_hidden");
    }

    #[tokio::test]
    async fn upload_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path().to_path_buf()).await.unwrap();
        let bytes = jpeg(2048);
        let req = UploadPhotoRequest {
            file_data: data_url("jpeg", &bytes),
            file_name: "bukti.jpg".into(),
        };

        let stored = store.upload(&req).await.unwrap();
        assert!(stored.file_name.ends_with("_bukti.jpeg"));
        assert_eq!(stored.url, format!("/uploads/{}", stored.file_name));
        assert_eq!(store.get(&stored.file_name).await.unwrap(), Some(bytes));

        store.delete(&stored.file_name).await.unwrap();
        assert_eq!(store.get(&stored.file_name).await.unwrap(), None);
        // deleting again is not an error
        store.delete(&stored.file_name).await.unwrap();
    }

    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::other("no space left on device")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path().to_path_buf()).await.unwrap();
        let name = "1705301400000_bukti.jpeg";
        let path = store.file_path(name);
        fs::write(&path, [0xFF, 0xD8]).await.unwrap();

        let err = write_or_discard(&path, FullDisk, &jpeg(2048)).await.unwrap_err();
        assert!(matches!(err, AppError::Dependency(_)));
        assert!(!path.exists());
        assert_eq!(store.get(name).await.unwrap(), None);
    }

    #[tokio::test]
    async fn successful_write_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.png");
        let file = fs::File::create(&path).await.unwrap();
        write_or_discard(&path, file, &PNG_SIGNATURE).await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), PNG_SIGNATURE.to_vec());
    }

    #[tokio::test]
    async fn identical_uploads_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path().to_path_buf()).await.unwrap();
        let req = UploadPhotoRequest {
            file_data: data_url("gif", b"GIF89a\x01\x00"),
            file_name: "same.gif".into(),
        };
        let a = store.upload(&req).await.unwrap();
        let b = store.upload(&req).await.unwrap();
        assert_ne!(a.file_name, b.file_name);
    }

    #[tokio::test]
    async fn malformed_names_on_get_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = PhotoStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.get("../secret").await.unwrap(), None);
        assert_eq!(store.get("missing.png").await.unwrap(), None);
        assert!(matches!(store.delete("../secret").await, Err(AppError::InvalidInput(_))));
        store.delete("missing.png").await.unwrap();
    }
}
