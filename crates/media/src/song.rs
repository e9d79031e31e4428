use {serde::Deserialize, thiserror::Error, tracing::debug};

#[derive(Debug, Error)]
pub enum SongError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The API answered but not in the promised shape.
    #[error("unexpected API response: {0}")]
    Shape(String),
}

/// First search hit for a query.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SongHit {
    pub title: String,
    pub url: String,
}

/// A resolved download link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongLink {
    pub title: String,
    pub download_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    result: Vec<SongHit>,
}

#[derive(Deserialize)]
struct DownloadResponse {
    #[serde(default)]
    status: bool,
    result: Option<DownloadResult>,
}

#[derive(Deserialize)]
struct DownloadResult {
    #[serde(rename = "downloadUrl")]
    download_url: Option<String>,
    title: Option<String>,
}

/// Client for the song search and download APIs.
pub struct SongClient {
    http: reqwest::Client,
    search_url: String,
    download_url: String,
}

impl SongClient {
    pub fn new(search_url: String, download_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            search_url,
            download_url,
        }
    }

    /// Search the index and return the first hit, or `None` when the query
    /// matches nothing.
    pub async fn search_first(&self, query: &str) -> Result<Option<SongHit>, SongError> {
        let url = format!("{}?q={}", self.search_url, urlencoding::encode(query));
        let response: SearchResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.status {
            return Ok(None);
        }
        let hit = response.result.into_iter().next();
        debug!(query, found = hit.is_some(), "song search");
        Ok(hit)
    }

    /// Resolve a search hit to a direct download link, validating the
    /// response shape field by field.
    pub async fn resolve(&self, hit: &SongHit) -> Result<SongLink, SongError> {
        let url = format!("{}?q={}", self.download_url, urlencoding::encode(&hit.url));
        let response: DownloadResponse = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.status {
            return Err(SongError::Shape("status is false".into()));
        }
        let result = response
            .result
            .ok_or_else(|| SongError::Shape("missing result".into()))?;
        let download_url = result
            .download_url
            .ok_or_else(|| SongError::Shape("missing result.downloadUrl".into()))?;
        let title = result.title.unwrap_or_else(|| hit.title.clone());

        Ok(SongLink {
            title,
            download_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &mockito::ServerGuard) -> SongClient {
        SongClient::new(
            format!("{}/search", server.url()),
            format!("{}/download", server.url()),
        )
    }

    #[tokio::test]
    async fn search_returns_first_hit() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::UrlEncoded("q".into(), "amagulu".into()))
            .with_body(
                r#"{"status":true,"result":[
                    {"title":"Amagulu","url":"https://yt.example/v1"},
                    {"title":"Amagulu (live)","url":"https://yt.example/v2"}
                ]}"#,
            )
            .create_async()
            .await;

        let hit = client(&server).search_first("amagulu").await.unwrap();
        assert_eq!(
            hit,
            Some(SongHit {
                title: "Amagulu".into(),
                url: "https://yt.example/v1".into(),
            })
        );
    }

    #[tokio::test]
    async fn search_empty_results_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"status":true,"result":[]}"#)
            .create_async()
            .await;

        assert!(client(&server).search_first("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_status_false_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"status":false}"#)
            .create_async()
            .await;

        assert!(client(&server).search_first("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_malformed_body_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::Any)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        assert!(client(&server).search_first("x").await.is_err());
    }

    #[tokio::test]
    async fn resolve_happy_path() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/download")
            .match_query(mockito::Matcher::UrlEncoded(
                "q".into(),
                "https://yt.example/v1".into(),
            ))
            .with_body(
                r#"{"status":true,"result":{"downloadUrl":"https://cdn.example/a.mp3","title":"Amagulu"}}"#,
            )
            .create_async()
            .await;

        let hit = SongHit {
            title: "whatever".into(),
            url: "https://yt.example/v1".into(),
        };
        let link = client(&server).resolve(&hit).await.unwrap();
        assert_eq!(link.title, "Amagulu");
        assert_eq!(link.download_url, "https://cdn.example/a.mp3");
    }

    #[tokio::test]
    async fn resolve_status_false_is_shape_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/download")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"status":false}"#)
            .create_async()
            .await;

        let hit = SongHit {
            title: "t".into(),
            url: "u".into(),
        };
        assert!(matches!(
            client(&server).resolve(&hit).await,
            Err(SongError::Shape(_))
        ));
    }

    #[tokio::test]
    async fn resolve_missing_download_url_is_shape_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/download")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"status":true,"result":{"title":"t"}}"#)
            .create_async()
            .await;

        let hit = SongHit {
            title: "t".into(),
            url: "u".into(),
        };
        assert!(matches!(
            client(&server).resolve(&hit).await,
            Err(SongError::Shape(_))
        ));
    }

    #[tokio::test]
    async fn resolve_falls_back_to_hit_title() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/download")
            .match_query(mockito::Matcher::Any)
            .with_body(r#"{"status":true,"result":{"downloadUrl":"https://cdn.example/a.mp3"}}"#)
            .create_async()
            .await;

        let hit = SongHit {
            title: "Original Title".into(),
            url: "u".into(),
        };
        let link = client(&server).resolve(&hit).await.unwrap();
        assert_eq!(link.title, "Original Title");
    }

    #[tokio::test]
    async fn http_error_status_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        assert!(client(&server).search_first("x").await.is_err());
    }
}
