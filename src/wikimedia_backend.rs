//! Wikimedia Commons implementation of the media-search backend.

use std::io::Read;
use std::time::Duration;

use serde_json::Value;

use crate::config::SearchConfig;
use crate::search_client::{MediaMetadata, MediaSearchBackend, SearchError, TitlePage};

/// File namespace on Commons.
const FILE_NAMESPACE: u32 = 6;
/// Upper bound on a single downloaded payload.
const MAX_DOWNLOAD_BYTES: u64 = 64 * 1024 * 1024;

pub struct WikimediaBackend {
    http_client: ureq::Agent,
    api_url: String,
    user_agent: String,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl WikimediaBackend {
    pub fn new(config: &SearchConfig) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .build();
        Self {
            http_client,
            api_url: config.api_url.clone(),
            user_agent: config.user_agent.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }

    fn map_ureq_failure(error: ureq::Error) -> SearchError {
        match error {
            ureq::Error::Status(code, _) => SearchError::Status(code),
            ureq::Error::Transport(transport) => SearchError::Transport(transport.to_string()),
        }
    }

    fn search_url(&self, query: &str, offset: usize, limit: usize) -> String {
        format!(
            "{}?action=query&format=json&list=search&srsearch={}&srnamespace={}&srlimit={}&sroffset={}",
            self.api_url,
            urlencoding::encode(query),
            FILE_NAMESPACE,
            limit,
            offset
        )
    }

    fn image_info_url(&self, title: &str) -> String {
        format!(
            "{}?action=query&format=json&prop=imageinfo&iiprop={}&titles={}",
            self.api_url,
            urlencoding::encode("url|size|mime"),
            urlencoding::encode(title)
        )
    }

    fn get_json(&self, url: &str) -> Result<Value, SearchError> {
        let response = self
            .http_client
            .get(url)
            .set("User-Agent", &self.user_agent)
            .set("Accept", "application/json")
            .timeout(self.request_timeout)
            .call()
            .map_err(Self::map_ureq_failure)?;
        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|error| SearchError::Decode(error.to_string()))?;
        serde_json::from_str(&body).map_err(|error| SearchError::Decode(error.to_string()))
    }
}

pub(crate) fn parse_search_page(payload: &Value) -> Result<TitlePage, SearchError> {
    if let Some(info) = payload["error"]["info"].as_str() {
        return Err(SearchError::Malformed(info.to_string()));
    }
    let Some(hits) = payload["query"]["search"].as_array() else {
        return Ok(TitlePage::default());
    };

    let titles = hits
        .iter()
        .filter_map(|hit| hit["title"].as_str())
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .collect();
    let next_offset = payload["continue"]["sroffset"]
        .as_u64()
        .and_then(|offset| usize::try_from(offset).ok());
    Ok(TitlePage {
        titles,
        next_offset,
    })
}

pub(crate) fn parse_image_info(payload: &Value) -> Result<Option<MediaMetadata>, SearchError> {
    let Some(pages) = payload["query"]["pages"].as_object() else {
        return Err(SearchError::Malformed("missing query.pages".to_string()));
    };

    for page in pages.values() {
        let Some(info) = page["imageinfo"].as_array().and_then(|infos| infos.first()) else {
            continue;
        };
        let dimension =
            |key: &str| u32::try_from(info[key].as_u64().unwrap_or_default()).unwrap_or(0);
        return Ok(Some(MediaMetadata {
            url: info["url"].as_str().unwrap_or_default().to_string(),
            width: dimension("width"),
            height: dimension("height"),
            mime: info["mime"].as_str().unwrap_or_default().to_string(),
        }));
    }
    Ok(None)
}

impl MediaSearchBackend for WikimediaBackend {
    fn search_titles(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<TitlePage, SearchError> {
        let payload = self.get_json(&self.search_url(query, offset, limit))?;
        parse_search_page(&payload)
    }

    fn image_metadata(&self, title: &str) -> Result<Option<MediaMetadata>, SearchError> {
        let payload = self.get_json(&self.image_info_url(title))?;
        parse_image_info(&payload)
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SearchError> {
        let response = self
            .http_client
            .get(url)
            .set("User-Agent", &self.user_agent)
            .timeout(self.download_timeout)
            .call()
            .map_err(Self::map_ureq_failure)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_DOWNLOAD_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|error| SearchError::Decode(error.to_string()))?;
        if bytes.is_empty() {
            return Err(SearchError::Decode("empty response body".to_string()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_image_info, parse_search_page, WikimediaBackend};
    use crate::config::SearchConfig;
    use crate::search_client::SearchError;

    #[test]
    fn test_parse_search_page_reads_titles_and_continuation() {
        let payload = json!({
            "continue": { "sroffset": 20, "continue": "-||" },
            "query": { "search": [
                { "ns": 6, "title": "File:Ada Lovelace portrait.jpg" },
                { "ns": 6, "title": "  " },
                { "ns": 6, "title": "File:Ada Byron.png" }
            ]}
        });
        let page = parse_search_page(&payload).expect("page");
        assert_eq!(
            page.titles,
            vec!["File:Ada Lovelace portrait.jpg", "File:Ada Byron.png"]
        );
        assert_eq!(page.next_offset, Some(20));
    }

    #[test]
    fn test_parse_search_page_without_results_is_empty() {
        let page = parse_search_page(&json!({ "batchcomplete": "" })).expect("page");
        assert!(page.titles.is_empty());
        assert_eq!(page.next_offset, None);
        assert!(matches!(
            parse_search_page(&json!({ "error": { "info": "bad srsearch" } })),
            Err(SearchError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_image_info_takes_first_imageinfo() {
        let payload = json!({
            "query": { "pages": { "123": {
                "title": "File:A.jpg",
                "imageinfo": [{
                    "url": "https://upload.wikimedia.org/a.jpg",
                    "width": 1200,
                    "height": 1600,
                    "mime": "image/jpeg"
                }]
            }}}
        });
        let metadata = parse_image_info(&payload)
            .expect("parse")
            .expect("metadata");
        assert_eq!(metadata.width, 1200);
        assert_eq!(metadata.height, 1600);
        assert_eq!(metadata.mime, "image/jpeg");

        let missing = json!({ "query": { "pages": { "-1": { "missing": "" } } } });
        assert_eq!(parse_image_info(&missing).expect("parse"), None);
        assert!(parse_image_info(&json!({})).is_err());
    }

    #[test]
    fn test_request_urls_are_encoded_for_the_file_namespace() {
        let backend = WikimediaBackend::new(&SearchConfig::default());
        let search = backend.search_url("Ada Lovelace & England", 30, 15);
        assert!(search.contains("srsearch=Ada%20Lovelace%20%26%20England"));
        assert!(search.contains("srnamespace=6"));
        assert!(search.contains("sroffset=30"));

        let info = backend.image_info_url("File:A b.jpg");
        assert!(info.contains("iiprop=url%7Csize%7Cmime"));
        assert!(info.contains("titles=File%3AA%20b.jpg"));
    }
}
