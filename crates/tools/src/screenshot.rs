//! Website screenshots through a shared headless Chromium instance.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::page::ScreenshotParams;
use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use futures_util::StreamExt;
use proto::{
    ParamSpec, ParamType, SCREENSHOT_STORAGE, SessionKey, StoragePolicy, ToolError, ToolSchema,
};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{SessionContext, Tool, ToolHandler, ToolOutput, parse_args, temporal};

const DEFAULT_WIDTH: u32 = 1366;
const DEFAULT_HEIGHT: u32 = 900;
const MIN_DIMENSION: u32 = 320;
const MAX_DIMENSION: u32 = 3840;
const MAX_TIMEOUT_SECS: u64 = 60;

struct BrowserState {
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
}

impl BrowserState {
    fn new() -> Self {
        Self {
            browser: None,
            handler_task: None,
        }
    }

    async fn browser(&mut self) -> Result<&Browser, String> {
        if self.browser.is_none() {
            self.launch().await?;
        }
        self.browser
            .as_ref()
            .ok_or_else(|| "Browser is not initialized".to_string())
    }

    async fn launch(&mut self) -> Result<(), String> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(|e| format!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| format!("Failed to launch browser: {e}"))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(browser);
        self.handler_task = Some(handler_task);
        Ok(())
    }
}

impl Drop for BrowserState {
    fn drop(&mut self) {
        if let Some(handle) = self.handler_task.take() {
            handle.abort();
        }
    }
}

fn shared_state() -> Arc<Mutex<BrowserState>> {
    static STATE: OnceLock<Arc<Mutex<BrowserState>>> = OnceLock::new();
    STATE
        .get_or_init(|| Arc::new(Mutex::new(BrowserState::new())))
        .clone()
}

fn clamp_dimension(value: Option<u32>, default: u32) -> u32 {
    value.unwrap_or(default).clamp(MIN_DIMENSION, MAX_DIMENSION)
}

/// Archive entry for screenshots kept under the persisted-record policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotRecord {
    pub session_key: SessionKey,
    pub url: String,
    pub title: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<FixedOffset>,
}

/// Storage collaborator for persisted screenshots.
#[async_trait]
pub trait ScreenshotArchive: Send + Sync {
    /// Stores the record and returns its id.
    async fn record(&self, record: ScreenshotRecord) -> Result<u64, ToolError>;
}

#[derive(Default)]
pub struct InMemoryScreenshotArchive {
    next_id: AtomicU64,
    records: DashMap<u64, ScreenshotRecord>,
}

impl InMemoryScreenshotArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<ScreenshotRecord> {
        self.records.get(&id).map(|r| r.clone())
    }
}

#[async_trait]
impl ScreenshotArchive for InMemoryScreenshotArchive {
    async fn record(&self, record: ScreenshotRecord) -> Result<u64, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.insert(id, record);
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
struct ScreenshotArgs {
    url: String,
    full_page: Option<bool>,
    width: Option<u32>,
    height: Option<u32>,
    storage_mode: Option<String>,
    timeout_secs: Option<u64>,
}

struct Capture {
    png: Vec<u8>,
    title: String,
    final_url: String,
}

/// `capture_website_screenshot`
pub struct CaptureScreenshotTool {
    output_dir: PathBuf,
    default_timeout: Duration,
    archive: Arc<dyn ScreenshotArchive>,
}

impl CaptureScreenshotTool {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        default_timeout: Duration,
        archive: Arc<dyn ScreenshotArchive>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            default_timeout,
            archive,
        }
    }

    fn operation_timeout(&self, timeout_secs: Option<u64>) -> Duration {
        match timeout_secs {
            Some(secs) => Duration::from_secs(secs.clamp(1, MAX_TIMEOUT_SECS)),
            None => self.default_timeout,
        }
    }

    /// Explicit argument first, then the session option, then the default.
    async fn storage_policy(
        &self,
        requested: Option<&str>,
        ctx: &SessionContext,
    ) -> Result<StoragePolicy, ToolError> {
        if let Some(requested) = requested.filter(|r| !r.trim().is_empty()) {
            return StoragePolicy::from_str(requested)
                .map_err(|e| ToolError::InvalidArgs(e.to_string()));
        }
        let configured = ctx.settings.get(SCREENSHOT_STORAGE).await?;
        Ok(configured
            .as_deref()
            .and_then(|v| match StoragePolicy::from_str(v) {
                Ok(policy) => Some(policy),
                Err(e) => {
                    warn!(session = %ctx.session_key, "Ignoring stored option: {e}");
                    None
                }
            })
            .unwrap_or_default())
    }

    /// Where the PNG is written for the given policy.
    fn artifact_path(
        &self,
        policy: StoragePolicy,
        session: &SessionKey,
        captured_at: DateTime<FixedOffset>,
    ) -> PathBuf {
        let file = format!(
            "{}-{}.png",
            captured_at.format("%Y%m%d-%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        match policy {
            StoragePolicy::None => std::env::temp_dir().join("clerk-screenshots").join(file),
            StoragePolicy::LocalFile | StoragePolicy::PersistedRecord => self
                .output_dir
                .join("screenshots")
                .join(sanitize_segment(session.as_str()))
                .join(file),
        }
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

async fn capture(url: &Url, width: u32, height: u32, full_page: bool) -> Result<Capture, String> {
    let state = shared_state();
    let page = {
        let mut state = state.lock().await;
        let browser = state.browser().await?;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| format!("Failed to create page: {e}"))?
    };

    page.execute(SetDeviceMetricsOverrideParams::new(
        i64::from(width),
        i64::from(height),
        1.0,
        false,
    ))
    .await
    .map_err(|e| format!("Failed to set viewport: {e}"))?;

    page.goto(url.as_str())
        .await
        .map_err(|e| format!("Navigation failed: {e}"))?;

    let title = page
        .get_title()
        .await
        .map_err(|e| format!("Failed to read page title: {e}"))?
        .unwrap_or_default();
    let final_url = page
        .url()
        .await
        .map_err(|e| format!("Failed to read page URL: {e}"))?
        .unwrap_or_else(|| url.to_string());
    let png = page
        .screenshot(ScreenshotParams::builder().full_page(full_page).build())
        .await
        .map_err(|e| format!("Failed to capture screenshot: {e}"))?;

    if let Err(e) = page.close().await {
        debug!("Failed to close page: {e}");
    }
    Ok(Capture {
        png,
        title,
        final_url,
    })
}

async fn write_png(path: &Path, png: &[u8]) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, png).await?;
    Ok(())
}

#[async_trait]
impl ToolHandler for CaptureScreenshotTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: ScreenshotArgs = parse_args(args)?;
        let url = match Url::parse(parsed.url.trim()) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => u,
            Ok(_) => {
                return Err(ToolError::InvalidArgs(
                    "Only http/https URLs are supported".to_string(),
                ));
            }
            Err(e) => return Err(ToolError::InvalidArgs(format!("Invalid URL: {e}"))),
        };
        let policy = self
            .storage_policy(parsed.storage_mode.as_deref(), &ctx)
            .await?;
        let width = clamp_dimension(parsed.width, DEFAULT_WIDTH);
        let height = clamp_dimension(parsed.height, DEFAULT_HEIGHT);
        let full_page = parsed.full_page.unwrap_or(true);
        let timeout_duration = self.operation_timeout(parsed.timeout_secs);

        let shot = timeout(timeout_duration, capture(&url, width, height, full_page))
            .await
            .map_err(|_| ToolError::Timeout(timeout_duration))?
            .map_err(ToolError::ExecutionFailed)?;

        let (image_width, image_height) = image::load_from_memory(&shot.png)
            .map(|img| (img.width(), img.height()))
            .unwrap_or((0, 0));

        let path = self.artifact_path(policy, &ctx.session_key, ctx.now);
        write_png(&path, &shot.png).await?;

        let screenshot_id = match policy {
            StoragePolicy::PersistedRecord => Some(
                self.archive
                    .record(ScreenshotRecord {
                        session_key: ctx.session_key.clone(),
                        url: shot.final_url.clone(),
                        title: shot.title.clone(),
                        path: path.clone(),
                        width: image_width,
                        height: image_height,
                        captured_at: ctx.now,
                    })
                    .await?,
            ),
            _ => None,
        };
        debug!(session = %ctx.session_key, path = %path.display(), policy = %policy, "Screenshot stored");

        Ok(ToolOutput::new(
            format!("已截图：{}", shot.final_url),
            json!({
                "url": shot.final_url,
                "title": shot.title,
                "path": path.to_string_lossy(),
                "width": image_width,
                "height": image_height,
                "size_bytes": shot.png.len(),
                "full_page": full_page,
                "storage_mode": policy.as_str(),
                "screenshot_id": screenshot_id,
                "captured_at": temporal::format_timestamp(ctx.now),
            }),
        ))
    }
}

impl Tool for CaptureScreenshotTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "capture_website_screenshot",
            "Open a web page in a headless browser and capture a PNG screenshot.",
        )
        .param(ParamSpec::required("url", ParamType::String, "http(s) address of the page"))
        .param(ParamSpec::optional(
            "full_page",
            ParamType::Boolean,
            "Capture the whole scrollable page (default true)",
        ))
        .param(ParamSpec::optional("width", ParamType::Integer, "Viewport width, 320-3840"))
        .param(ParamSpec::optional("height", ParamType::Integer, "Viewport height, 320-3840"))
        .param(
            ParamSpec::optional(
                "storage_mode",
                ParamType::String,
                "Where to keep the image; the session preference when omitted",
            )
            .one_of(&["none", "local-file", "persisted-record"]),
        )
        .param(ParamSpec::optional(
            "timeout_secs",
            ParamType::Integer,
            "Operation timeout in seconds (max 60)",
        ))
    }
}
