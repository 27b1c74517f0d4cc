//! Map tile cache and proxy.
//!
//! The display side asks for tiles by (zoom, x, y). Hits come straight from
//! a bounded LRU cache; misses dispatch exactly one fetch per key, either
//! directly over HTTP (when this end owns network access) or as a
//! `TileRequest` over the link (proxied mode), and the caller polls again
//! or listens for the updated notification.

mod cache;
mod fetch;

pub use cache::{TileCache, TileFetcher, TileKey, TileRequester};
pub use fetch::HttpTileFetcher;

/// Magic-number check for the raster formats tile servers actually serve.
/// A payload that is not one of these does not count as a decodable image.
pub fn is_decodable_image(bytes: &[u8]) -> bool {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = b"\xff\xd8\xff";
    const GIF: &[u8] = b"GIF8";
    if bytes.starts_with(PNG) || bytes.starts_with(JPEG) || bytes.starts_with(GIF) {
        return true;
    }
    // RIFF....WEBP
    bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
}

#[cfg(test)]
mod tests {
    use super::is_decodable_image;

    #[test]
    fn recognizes_raster_magics() {
        assert!(is_decodable_image(b"\x89PNG\r\n\x1a\n1234"));
        assert!(is_decodable_image(b"\xff\xd8\xff\xe0rest"));
        assert!(is_decodable_image(b"GIF89a"));
        assert!(is_decodable_image(b"RIFF\x00\x00\x00\x00WEBPVP8 "));
    }

    #[test]
    fn rejects_non_images() {
        assert!(!is_decodable_image(b""));
        assert!(!is_decodable_image(b"<html>404 not found</html>"));
        assert!(!is_decodable_image(b"RIFF\x00\x00\x00\x00WAVE"));
    }
}
