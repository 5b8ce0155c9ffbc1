use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTouchEmulationEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::loader::{FeedSurface, ScrollAnchor, ScrollMetrics};
use crate::parser::messages::MESSAGE_SELECTOR;

// ── Device profiles ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Iphone,
    Android,
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub user_agent: &'static str,
}

impl Device {
    pub fn profile(self) -> DeviceProfile {
        match self {
            Device::Iphone => DeviceProfile {
                width: 390,
                height: 844,
                scale: 3.0,
                user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Mobile/15E148 Safari/604.1",
            },
            Device::Android => DeviceProfile {
                width: 412,
                height: 915,
                scale: 2.625,
                user_agent: "Mozilla/5.0 (Linux; Android 13) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Mobile Safari/537.36",
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub chrome_bin: Option<PathBuf>,
    pub headless: bool,
    pub nav_timeout: Duration,
    pub settle: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            chrome_bin: None,
            headless: true,
            nav_timeout: Duration::from_secs(120),
            settle: Duration::from_secs(3),
        }
    }
}

// ── Scripts ──

fn advance_script(anchor: ScrollAnchor) -> String {
    let block = match anchor {
        ScrollAnchor::Center => "center",
        ScrollAnchor::End => "end",
    };
    format!(
        r#"(() => {{
            const messages = document.querySelectorAll('{sel}');
            const last = messages[messages.length - 1];
            if (last) {{
                last.scrollIntoView({{ behavior: 'smooth', block: '{block}' }});
            }} else {{
                window.scrollBy(0, window.innerHeight * 3);
            }}
            return {{ messageCount: messages.length, scrollHeight: document.body.scrollHeight }};
        }})()"#,
        sel = MESSAGE_SELECTOR,
        block = block,
    )
}

fn count_script() -> String {
    format!("document.querySelectorAll('{}').length", MESSAGE_SELECTOR)
}

const SCROLL_TOP: &str = "window.scrollTo(0, 0)";
const SCROLL_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

// ── Session ──

/// One headless browser with a single emulated mobile tab.
pub struct FeedSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    options: BrowserOptions,
}

impl FeedSession {
    pub async fn launch(options: &BrowserOptions, device: &DeviceProfile) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .window_size(device.width, device.height);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(bin) = &options.chrome_bin {
            builder = builder.chrome_executable(bin);
        }
        let config = builder.build().map_err(SyncError::Session)?;

        let (browser, mut events) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        debug!("Browser launched");

        Ok(Self {
            browser,
            handler,
            page: None,
            options: options.clone(),
        })
    }

    /// Open the feed in a tab configured as `device`.
    pub async fn open(&mut self, url: &str, device: &DeviceProfile) -> Result<()> {
        let page = self.browser.new_page("about:blank").await?;
        self.page = Some(page.clone());

        page.set_user_agent(device.user_agent).await?;
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(device.width as i64)
            .height(device.height as i64)
            .device_scale_factor(device.scale)
            .mobile(true)
            .build()
            .map_err(SyncError::Session)?;
        page.execute(metrics).await?;
        page.execute(SetTouchEmulationEnabledParams::new(true)).await?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(serde_json::json!({
            "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            "Accept-Language": "en-US,en;q=0.9",
            "Accept-Encoding": "gzip, deflate, br",
        }))))
        .await?;

        info!("Navigating to {}", url);
        match tokio::time::timeout(self.options.nav_timeout, page.goto(url)).await {
            Err(_) => {
                return Err(SyncError::NavigationTimeout {
                    url: url.to_string(),
                    secs: self.options.nav_timeout.as_secs(),
                })
            }
            Ok(res) => {
                res?;
            }
        }
        tokio::time::sleep(self.options.settle).await;
        Ok(())
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| SyncError::Session("no page open".into()))
    }

    pub async fn content(&self) -> Result<String> {
        Ok(self.page()?.content().await?)
    }

    async fn run(&self, script: impl Into<String>) -> Result<()> {
        self.page()?
            .evaluate(script.into())
            .await
            .map_err(|e| SyncError::Script(e.to_string()))?;
        Ok(())
    }

    /// Tear down the tab and browser. Failures here are logged, not raised.
    pub async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Page close failed: {}", e);
            }
        }
        if let Err(e) = self.browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser wait failed: {}", e);
        }
        self.handler.abort();
        debug!("Browser closed");
    }
}

#[async_trait]
impl FeedSurface for FeedSession {
    async fn advance(&self, anchor: ScrollAnchor) -> Result<ScrollMetrics> {
        self.page()?
            .evaluate(advance_script(anchor))
            .await
            .map_err(|e| SyncError::Script(e.to_string()))?
            .into_value::<ScrollMetrics>()
            .map_err(|e| SyncError::Script(e.to_string()))
    }

    async fn message_count(&self) -> Result<usize> {
        self.page()?
            .evaluate(count_script())
            .await
            .map_err(|e| SyncError::Script(e.to_string()))?
            .into_value::<usize>()
            .map_err(|e| SyncError::Script(e.to_string()))
    }

    async fn jump_to_top(&self) -> Result<()> {
        self.run(SCROLL_TOP).await
    }

    async fn jump_to_bottom(&self) -> Result<()> {
        self.run(SCROLL_BOTTOM).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_match_devices() {
        let iphone = Device::Iphone.profile();
        assert_eq!((iphone.width, iphone.height), (390, 844));
        assert!(iphone.user_agent.contains("iPhone OS 16_0"));

        let android = Device::Android.profile();
        assert_eq!((android.width, android.height), (412, 915));
        assert_eq!(android.scale, 2.625);
    }

    #[test]
    fn advance_script_uses_anchor() {
        assert!(advance_script(ScrollAnchor::Center).contains("block: 'center'"));
        assert!(advance_script(ScrollAnchor::End).contains("block: 'end'"));
        assert!(advance_script(ScrollAnchor::End).contains(MESSAGE_SELECTOR));
    }
}
