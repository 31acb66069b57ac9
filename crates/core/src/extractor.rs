use crate::config::OcrConfig;
use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    pdf_base64: String,
    filename: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    pages: Option<Vec<OcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    debug!(page = page_no, %error, "page has no extractable text");
                    continue;
                }
            };

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text: text.trim().to_string(),
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub async fn extract_page_texts(
    path: &Path,
    ocr: Option<&OcrConfig>,
) -> Result<Vec<PageText>, IngestError> {
    let owned: PathBuf = path.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || LopdfExtractor.extract_pages(&owned))
        .await
        .map_err(|error| IngestError::PdfParse(format!("extraction task failed: {error}")))?;

    match (extracted, ocr) {
        (Ok(pages), _) => Ok(pages),
        (Err(IngestError::PdfParse(parse_error)), Some(cfg)) => {
            warn!(path = %path.display(), error = %parse_error, "lopdf failed, trying OCR fallback");
            extract_with_ocr(path, cfg).await.map_err(|ocr_error| {
                IngestError::PdfParse(format!("{parse_error}; OCR fallback failed: {ocr_error}"))
            })
        }
        (Err(error), _) => Err(error),
    }
}

async fn extract_with_ocr(path: &Path, cfg: &OcrConfig) -> Result<Vec<PageText>, IngestError> {
    let pdf = tokio::fs::read(path).await?;
    let payload = OcrRequest {
        pdf_base64: STANDARD.encode(pdf),
        filename: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
    };

    let mut request = Client::new().post(cfg.endpoint.as_str()).json(&payload);
    if let Some(api_key) = &cfg.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(IngestError::OcrFailed(format!(
            "OCR request to {} returned {}",
            cfg.endpoint,
            response.status()
        )));
    }

    let payload: OcrResponse = response.json().await?;
    payload_to_pages(&payload, path)
}

fn payload_to_pages(payload: &OcrResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .enumerate()
            .filter_map(|(index, page)| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    return None;
                }
                Some(PageText {
                    number: page.page.unwrap_or(index as u32 + 1),
                    text: text.to_string(),
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let text = chunk.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: index as u32 + 1,
                        text: text.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "OCR response had no readable text for {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn ocr_pages_keep_only_nonempty_text() {
        let response = OcrResponse {
            pages: Some(vec![
                OcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                OcrPage {
                    page: None,
                    text: Some("Second listed".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf")).expect("pages should parse");
        assert_eq!(
            pages,
            vec![PageText {
                number: 2,
                text: "Second listed".to_string()
            }]
        );
    }

    #[test]
    fn ocr_text_blob_is_split_on_form_feed() {
        let response = OcrResponse {
            pages: None,
            text: Some("First\u{000C}\u{000C}Third\n".to_string()),
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf")).expect("pages should parse");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[1].number, 3);
        assert_eq!(pages[1].text, "Third");
    }

    #[test]
    fn empty_ocr_response_is_an_error() {
        let response = OcrResponse {
            pages: Some(Vec::new()),
            text: Some(" \u{000C} ".to_string()),
        };
        assert!(payload_to_pages(&response, Path::new("x.pdf")).is_err());
    }

    #[tokio::test]
    async fn unreadable_pdf_without_ocr_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = extract_page_texts(&path, None).await;
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}
