use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stored avatars are forced to this square size; aspect ratio is not kept.
pub const AVATAR_SIZE: u32 = 250;

#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    #[error("avatar decode failed: {0}")]
    Decode(image::ImageError),
    #[error("avatar encode failed: {0}")]
    Encode(image::ImageError),
}

/// Deterministic placeholder avatar for a fresh account: a Gravatar identicon
/// URL keyed by a digest of the normalized email.
pub fn identicon_url(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!(
        "https://www.gravatar.com/avatar/{}?d=identicon",
        hex::encode(digest)
    )
}

/// Decode an uploaded image, force it to 250x250 and re-encode it in its
/// original format. `resize_exact` stretches rather than crops.
pub fn resize_square(data: &[u8]) -> Result<Vec<u8>, AvatarError> {
    let format = image::guess_format(data).map_err(AvatarError::Decode)?;
    let img = image::load_from_memory_with_format(data, format).map_err(AvatarError::Decode)?;
    let resized = img.resize_exact(AVATAR_SIZE, AVATAR_SIZE, FilterType::Triangle);

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, format)
        .map_err(AvatarError::Encode)?;
    Ok(out.into_inner())
}

/// Destination filename: the user id plus whatever extension the upload had.
/// A user re-uploading under a new extension leaves the old file behind.
pub fn filename_for(user_id: Uuid, original_name: &str) -> String {
    match Path::new(original_name).extension() {
        Some(ext) => format!("{}.{}", user_id, ext.to_string_lossy()),
        None => user_id.to_string(),
    }
}

pub fn public_url(filename: &str) -> String {
    format!("/avatars/{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn identicon_url_is_deterministic_per_email() {
        let a = identicon_url("user@example.com");
        let b = identicon_url("  USER@example.com ");
        let c = identicon_url("other@example.com");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("https://www.gravatar.com/avatar/"));
        assert!(a.ends_with("?d=identicon"));
    }

    #[test]
    fn resize_forces_exact_square() {
        let out = resize_square(&png_bytes(10, 20)).expect("resize should succeed");
        let img = image::load_from_memory(&out).expect("output should decode");
        assert_eq!((img.width(), img.height()), (AVATAR_SIZE, AVATAR_SIZE));
    }

    #[test]
    fn resize_keeps_the_source_format() {
        let out = resize_square(&png_bytes(300, 300)).expect("resize should succeed");
        assert_eq!(
            image::guess_format(&out).expect("format"),
            image::ImageFormat::Png
        );
    }

    #[test]
    fn resize_rejects_non_image_data() {
        let err = resize_square(b"this is not an image").unwrap_err();
        assert!(matches!(err, AvatarError::Decode(_)));
    }

    #[test]
    fn filename_keeps_the_original_extension() {
        let id = Uuid::new_v4();
        assert_eq!(filename_for(id, "selfie.png"), format!("{id}.png"));
        assert_eq!(filename_for(id, "weird.name.JPG"), format!("{id}.JPG"));
        assert_eq!(filename_for(id, "noext"), id.to_string());
    }

    #[test]
    fn public_url_points_into_the_avatars_dir() {
        assert_eq!(public_url("abc.png"), "/avatars/abc.png");
    }
}
