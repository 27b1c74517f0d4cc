//! HTTP tile fetcher with fallback across multiple tile servers.

use crate::error::{Error, Result};
use crate::tiles::{TileFetcher, TileKey, is_decodable_image};
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Fetches tiles from a list of URL templates, first decodable image wins.
///
/// Templates use `{z}`, `{x}` and `{y}` placeholders, e.g.
/// `https://tile.openstreetmap.org/{z}/{x}/{y}.png`.
pub struct HttpTileFetcher {
    client: reqwest::blocking::Client,
    templates: Vec<String>,
}

impl HttpTileFetcher {
    pub fn new(templates: Vec<String>, user_agent: &str) -> Result<Self> {
        if templates.is_empty() {
            return Err(Error::InvalidParameter(
                "at least one tile URL template is required".to_string(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, templates })
    }

    fn fetch_one(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("{} returned {}", url, response.status())));
        }
        Ok(response.bytes()?.to_vec())
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch(&self, key: TileKey) -> Option<Vec<u8>> {
        for template in &self.templates {
            let url = expand_template(template, key);
            match self.fetch_one(&url) {
                Ok(bytes) if is_decodable_image(&bytes) => {
                    log::debug!("Fetched tile {} from {} ({} bytes)", key, url, bytes.len());
                    return Some(bytes);
                }
                Ok(bytes) => {
                    log::warn!(
                        "Tile server {} returned a non-image payload ({} bytes)",
                        url,
                        bytes.len()
                    );
                }
                Err(e) => {
                    log::warn!("Tile fetch from {} failed: {}", url, e);
                }
            }
        }
        log::warn!("All tile servers failed for {}", key);
        None
    }
}

/// Substitute `{z}`, `{x}` and `{y}` in a URL template.
fn expand_template(template: &str, key: TileKey) -> String {
    template
        .replace("{z}", &key.z.to_string())
        .replace("{x}", &key.x.to_string())
        .replace("{y}", &key.y.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_all_placeholders() {
        let url = expand_template("https://tiles.example/{z}/{x}/{y}.png", TileKey::new(15, 3, 7));
        assert_eq!(url, "https://tiles.example/15/3/7.png");
    }

    #[test]
    fn expands_repeated_placeholders() {
        let url = expand_template("https://{z}.example/{z}/{x}/{y}", TileKey::new(2, 1, 0));
        assert_eq!(url, "https://2.example/2/1/0");
    }

    #[test]
    fn rejects_empty_template_list() {
        assert!(HttpTileFetcher::new(vec![], "test-agent").is_err());
    }
}
