use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

use super::ImageCandidate;

static MEDIA_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        ".tgme_widget_message_photo_wrap, .tgme_widget_message_document_wrap, .photo, .media-photo, img",
    )
    .unwrap()
});
static BG_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"background-image:\s*url\(\s*['"]?([^'")]+)"#).unwrap());
// Anchored so max-width / line-height never match.
static WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|[;\s])width:\s*(\d+)").unwrap());
static HEIGHT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|[;\s])height:\s*(\d+)").unwrap());

/// Image-bearing elements of one message, in document order. Elements with
/// no resolvable URL are skipped.
pub fn candidates(message: ElementRef<'_>, base: &Url) -> Vec<ImageCandidate> {
    message
        .select(&MEDIA_SEL)
        .filter_map(|el| resolve(el, base))
        .collect()
}

fn resolve(el: ElementRef<'_>, base: &Url) -> Option<ImageCandidate> {
    let attrs = el.value();
    let style = attrs.attr("style").unwrap_or("");

    let raw = BG_URL_RE
        .captures(style)
        .map(|c| c[1].trim().to_string())
        .or_else(|| attrs.attr("src").map(str::to_string))
        .or_else(|| attrs.attr("data-src").map(str::to_string))?;
    let url = absolutize(&raw, base)?;

    let width = style_px(&WIDTH_RE, style).unwrap_or_else(|| attr_px(attrs.attr("width")));
    let height = style_px(&HEIGHT_RE, style).unwrap_or_else(|| attr_px(attrs.attr("height")));

    Some(ImageCandidate { url, width, height })
}

/// `//host/x` and `/x` resolve against the feed origin; absolute URLs pass through.
pub fn absolutize(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    base.join(raw).ok().map(String::from)
}

fn style_px(re: &Regex, style: &str) -> Option<u32> {
    re.captures(style).and_then(|c| c[1].parse().ok())
}

fn attr_px(value: Option<&str>) -> u32 {
    value
        .map(|v| v.trim().trim_end_matches("px"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn base() -> Url {
        Url::parse("https://t.me/s/somechannel").unwrap()
    }

    fn first_message(html: &str) -> Vec<ImageCandidate> {
        let doc = Html::parse_fragment(html);
        let sel = Selector::parse(".tgme_widget_message").unwrap();
        let msg = doc.select(&sel).next().unwrap();
        candidates(msg, &base())
    }

    #[test]
    fn background_image_with_style_dimensions() {
        let c = first_message(
            r#"<div class="tgme_widget_message">
                <a class="tgme_widget_message_photo_wrap" style="width:800px;height:600px;background-image:url('https://cdn4.telesco.pe/file/a.jpg')"></a>
            </div>"#,
        );
        assert_eq!(
            c,
            vec![ImageCandidate {
                url: "https://cdn4.telesco.pe/file/a.jpg".into(),
                width: 800,
                height: 600
            }]
        );
    }

    #[test]
    fn img_attributes_and_relative_paths() {
        let c = first_message(
            r#"<div class="tgme_widget_message">
                <img src="//cdn1.telesco.pe/file/b.jpg" width="640" height="480">
                <img data-src="/file/c.jpg">
            </div>"#,
        );
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].url, "https://cdn1.telesco.pe/file/b.jpg");
        assert_eq!((c[0].width, c[0].height), (640, 480));
        assert_eq!(c[1].url, "https://t.me/file/c.jpg");
        assert_eq!((c[1].width, c[1].height), (0, 0));
    }

    #[test]
    fn style_wins_over_attributes_and_ignores_max_width() {
        let c = first_message(
            r#"<div class="tgme_widget_message">
                <img style="max-width:100px; width:900px" width="10" height="700" src="https://x/d.jpg">
            </div>"#,
        );
        assert_eq!((c[0].width, c[0].height), (900, 700));
    }

    #[test]
    fn element_without_url_skipped() {
        let c = first_message(
            r#"<div class="tgme_widget_message"><div class="photo" style="width:800px"></div></div>"#,
        );
        assert!(c.is_empty());
    }
}
