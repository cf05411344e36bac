//! Fixture engine for testing.
//!
//! This engine ignores the image and replays an [`EngineResponse`] recorded
//! in a JSON file. It lets us exercise the whole pipeline without
//! `tesseract`, and reproduce odd engine output shapes on demand.

use tokio::sync::RwLock;

use crate::prelude::*;

use super::{EngineResponse, OcrEngine};

/// Replays a recorded engine response.
pub struct FixtureEngine {
    path: PathBuf,
    response: RwLock<Option<EngineResponse>>,
}

impl FixtureEngine {
    /// Create an engine that will load its response from `path` on start.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
            response: RwLock::new(None),
        }
    }

    /// Create an engine that replays `response`.
    pub fn from_response(response: EngineResponse) -> Self {
        Self {
            path: PathBuf::new(),
            response: RwLock::new(Some(response)),
        }
    }
}

#[async_trait]
impl OcrEngine for FixtureEngine {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn start(&self) -> Result<()> {
        let mut response = self.response.write().await;
        if response.is_none() {
            let json = tokio::fs::read_to_string(&self.path)
                .await
                .with_context(|| format!("failed to read fixture {:?}", self.path.display()))?;
            let parsed = serde_json::from_str(&json)
                .with_context(|| format!("failed to parse fixture {:?}", self.path.display()))?;
            *response = Some(parsed);
        }
        Ok(())
    }

    async fn recognize(&self, _image: &[u8], _mime_type: &str) -> Result<EngineResponse> {
        self.response
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("fixture engine has not been started"))
    }

    async fn stop(&self) -> Result<()> {
        // Forget file-backed responses so a restart re-reads them.
        if !self.path.as_os_str().is_empty() {
            *self.response.write().await = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_file_contents() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("response.json");
        tokio::fs::write(&path, r#"{ "text": "GROCERY STORE\nApples 2.99", "confidence": 91 }"#)
            .await?;

        let engine = FixtureEngine::new(&path);
        assert!(engine.recognize(b"", "image/png").await.is_err());
        engine.start().await?;
        let response = engine.recognize(b"", "image/png").await?;
        assert_eq!(response.confidence, Some(91.0));
        engine.stop().await?;
        assert!(engine.recognize(b"", "image/png").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn missing_fixture_fails_to_start() {
        let engine = FixtureEngine::new(Path::new("/nonexistent/fixture.json"));
        assert!(engine.start().await.is_err());
    }
}
