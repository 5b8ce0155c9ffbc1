use std::future::Future;
use std::io::Cursor;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use image::ImageReader;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tracing::{debug, info};

use crate::model::ImageRecord;

const PROBE_BATCH: usize = 5;
const PROBE_PAUSE: Duration = Duration::from_millis(250);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const CHECK_BATCH: usize = 10;
const CHECK_PAUSE: Duration = Duration::from_millis(100);
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub fn http_client(user_agent: &str) -> Result<Client> {
    Ok(Client::builder().user_agent(user_agent).build()?)
}

fn progress(total: usize, label: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {msg} {bar:40} {pos}/{len} (eta {eta})")?
            .progress_chars("=> "),
    );
    pb.set_message(label);
    Ok(pb)
}

/// Run `f` over `items` in fixed-size concurrent batches, pausing between
/// batches. Output order matches input order.
async fn run_batched<T, O, F, Fut>(
    items: Vec<T>,
    size: usize,
    pause: Duration,
    pb: &ProgressBar,
    f: F,
) -> Vec<O>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = O>,
{
    let mut out = Vec::with_capacity(items.len());
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        let batch: Vec<Fut> = items.by_ref().take(size).map(&f).collect();
        let n = batch.len();
        out.extend(join_all(batch).await);
        pb.inc(n as u64);
        if items.peek().is_some() && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    out
}

// ── Dimension probe ──

fn needs_probe(img: &ImageRecord) -> bool {
    img.width == 0 || img.height == 0
}

pub fn dimensions_from_bytes(bytes: &[u8]) -> Result<(u32, u32)> {
    Ok(ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?)
}

async fn fetch_dimensions(client: &Client, url: &str) -> Result<(u32, u32)> {
    let bytes = client
        .get(url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    dimensions_from_bytes(&bytes)
}

/// Fill in missing width/height. Failed probes leave the record unknown.
/// Returns how many records gained dimensions.
pub async fn probe_dimensions(client: &Client, images: &mut [ImageRecord]) -> Result<usize> {
    let targets: Vec<(usize, String)> = images
        .iter()
        .enumerate()
        .filter(|(_, img)| needs_probe(img))
        .map(|(i, img)| (i, img.url.clone()))
        .collect();
    if targets.is_empty() {
        return Ok(0);
    }

    let total = targets.len();
    info!("Probing dimensions for {} images", total);
    let pb = progress(total, "probe")?;
    let results = run_batched(targets, PROBE_BATCH, PROBE_PAUSE, &pb, |(i, url)| async move {
        let dims = match fetch_dimensions(client, &url).await {
            Ok(dims) => Some(dims),
            Err(e) => {
                debug!("Probe failed for {}: {}", url, e);
                None
            }
        };
        (i, dims)
    })
    .await;
    pb.finish_and_clear();

    let mut filled = 0;
    for (i, dims) in results {
        if let Some((w, h)) = dims {
            images[i].width = w;
            images[i].height = h;
            filled += 1;
        }
    }
    info!("Filled dimensions for {} of {} images", filled, total);
    Ok(filled)
}

// ── Link check ──

pub struct LinkReport {
    pub valid: Vec<ImageRecord>,
    pub broken: Vec<ImageRecord>,
}

async fn link_ok(client: &Client, url: &str) -> bool {
    match client.head(url).timeout(CHECK_TIMEOUT).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!("HEAD failed for {}: {}", url, e);
            false
        }
    }
}

/// HEAD every record (thumbnail if present, else the content URL) and split
/// them by whether the URL still resolves.
pub async fn check_links(client: &Client, images: Vec<ImageRecord>) -> Result<LinkReport> {
    info!("Checking {} image links", images.len());
    let pb = progress(images.len(), "check")?;
    let checked = run_batched(images, CHECK_BATCH, CHECK_PAUSE, &pb, |img| async move {
        let target = img.thumbnail_url.as_deref().unwrap_or(&img.url);
        let ok = link_ok(client, target).await;
        (img, ok)
    })
    .await;
    pb.finish_and_clear();

    let (valid, broken): (Vec<_>, Vec<_>) = checked.into_iter().partition(|(_, ok)| *ok);
    let report = LinkReport {
        valid: valid.into_iter().map(|(img, _)| img).collect(),
        broken: broken.into_iter().map(|(img, _)| img).collect(),
    };
    info!("{} valid, {} broken", report.valid.len(), report.broken.len());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reads_png_header() {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(640, 427))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        assert_eq!(dimensions_from_bytes(&buf).unwrap(), (640, 427));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(dimensions_from_bytes(b"<html>not an image</html>").is_err());
    }

    #[test]
    fn only_unknown_dimensions_are_probed() {
        assert!(needs_probe(&record("a", 1, "https://x/a.jpg", 0, 0, 1)));
        assert!(needs_probe(&record("b", 1, "https://x/b.jpg", 800, 0, 1)));
        assert!(!needs_probe(&record("c", 1, "https://x/c.jpg", 800, 600, 1)));
    }

    #[tokio::test]
    async fn batches_keep_order_and_bound_concurrency() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let pb = ProgressBar::hidden();
        let out = run_batched((0..23).collect(), 5, Duration::ZERO, &pb, |i: usize| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;
        assert_eq!(out, (0..23).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(pb.position(), 23);
    }
}
