use std::iter;

use tracing::warn;

use crate::accumulator::ParseError;
use crate::models::{ChatContent, ChatMessage, NormalContent, ParsedContent, Section, TemplateKind};

pub const PAGE_LANG: &str = "zh-CN";

const ARTICLE_FALLBACK_TITLE: &str = "Article";
const CHAT_FALLBACK_TITLE: &str = "Chat";
const CHAT_FALLBACK_HEADER: &str = "Chat";
const PARSE_FAILURE_TITLE: &str = "Content generation";

const AVATAR_COLORS: [&str; 8] = ["#1AAD19", "#FA9D3B", "#576B95", "#EE5253", "#10AC84", "#5F27CD", "#00D2D3", "#FF6B6B"];

const ARTICLE_CSS: &str = r#"        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
            background-color: #f7f7f7;
            margin: 0;
            padding: 0;
            color: #333;
            line-height: 1.6;
        }
        .container {
            max-width: 600px;
            margin: 0 auto;
            background-color: #ffffff;
            padding: 20px;
            min-height: 100vh;
        }
        h1 {
            font-size: 22px;
            font-weight: bold;
            color: #000;
            margin-bottom: 15px;
            margin-top: 10px;
        }
        .intro {
            font-size: 15px;
            color: #555;
            margin-bottom: 30px;
            line-height: 1.6;
            white-space: pre-line;
        }
        .section-block {
            margin-bottom: 30px;
        }
        .section-title {
            font-size: 16px;
            font-weight: 500;
            color: #333;
            margin-bottom: 10px;
        }
        .list-content {
            margin: 0;
            padding: 0;
            list-style: none;
        }
        .list-content li {
            font-size: 15px;
            color: #555;
            margin-bottom: 5px;
            padding-left: 0;
        }
        .footer-note {
            font-size: 15px;
            color: #555;
            margin-top: 40px;
            margin-bottom: 20px;
            line-height: 1.6;
            white-space: pre-line;
        }"#;

const CHAT_CSS: &str = r#"        * {
            margin: 0;
            padding: 0;
            box-sizing: border-box;
        }
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", "PingFang SC", "Hiragino Sans GB", "Microsoft YaHei", sans-serif;
            background: #ededed;
            padding: 20px;
        }
        .chat-container {
            max-width: 500px;
            margin: 0 auto;
            background: #f5f5f5;
            border-radius: 10px;
            overflow: hidden;
            box-shadow: 0 2px 10px rgba(0,0,0,0.1);
        }
        .chat-header {
            background: #ededed;
            padding: 15px;
            text-align: center;
            font-size: 16px;
            color: #000;
            border-bottom: 1px solid #d9d9d9;
        }
        .chat-messages {
            padding: 20px 15px;
            background: #f5f5f5;
            min-height: 400px;
        }
        .message {
            margin-bottom: 20px;
            display: flex;
            align-items: flex-start;
        }
        .message.left {
            flex-direction: row;
        }
        .message.right {
            flex-direction: row-reverse;
        }
        .avatar {
            width: 45px;
            height: 45px;
            border-radius: 5px;
            flex-shrink: 0;
            display: flex;
            align-items: center;
            justify-content: center;
            color: #fff;
            font-size: 18px;
            font-weight: 500;
        }
        .message-content {
            max-width: 70%;
            margin: 0 10px;
        }
        .message-bubble {
            padding: 10px 15px;
            border-radius: 5px;
            font-size: 16px;
            line-height: 1.5;
            word-wrap: break-word;
            position: relative;
        }
        .message.left .message-bubble {
            background: #fff;
            border-radius: 0 8px 8px 8px;
        }
        .message.right .message-bubble {
            background: #95ec69;
            border-radius: 8px 0 8px 8px;
        }
        .message-time {
            text-align: center;
            color: #999;
            font-size: 12px;
            margin: 15px 0;
        }
        .nickname {
            font-size: 13px;
            color: #999;
            margin-bottom: 5px;
        }
        .message.right .nickname {
            text-align: right;
        }"#;

pub type Fragments<'a> = Box<dyn Iterator<Item = String> + Send + 'a>;

/// Escapes `& < > " '` for insertion into HTML text or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Maps parsed documents onto HTML fragments, in page order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn render<'a>(&self, doc: &'a ParsedContent, kind: TemplateKind) -> Fragments<'a> {
        if doc.kind() != kind {
            warn!(requested = kind.as_str(), parsed = doc.kind().as_str(), "model returned a different template shape, rendering what was parsed");
        }
        match doc {
            ParsedContent::Normal(article) => render_article(article),
            ParsedContent::Chat(chat) => render_chat(chat),
        }
    }

    /// Header, escaped raw model output, footer.
    pub fn render_fallback<'a>(&self, err: &'a ParseError) -> Fragments<'a> {
        Box::new(
            iter::once_with(|| article_header(PARSE_FAILURE_TITLE))
                .chain(iter::once_with(move || {
                    format!(
                        "        <div class=\"intro\">The model returned content in an unexpected format. Raw content:<br><pre>{}</pre></div>\n",
                        escape_html(&err.raw_text)
                    )
                }))
                .chain(iter::once_with(article_footer)),
        )
    }

    pub fn render_outcome<'a>(&self, outcome: &'a Result<ParsedContent, ParseError>, kind: TemplateKind) -> Fragments<'a> {
        match outcome {
            Ok(doc) => self.render(doc, kind),
            Err(err) => self.render_fallback(err),
        }
    }
}

// --- Article template ---

fn render_article(doc: &NormalContent) -> Fragments<'_> {
    Box::new(
        iter::once_with(move || article_header(doc.title.as_deref().unwrap_or(ARTICLE_FALLBACK_TITLE)))
            .chain(doc.title.iter().map(|t| format!("        <h1>{}</h1>\n", escape_html(t))))
            .chain(doc.intro.iter().map(|i| format!("        <p class=\"intro\">{}</p>\n", escape_html(i))))
            .chain(doc.sections.iter().enumerate().map(|(i, s)| render_section(i, s)))
            .chain(doc.footer.iter().map(|f| format!("        <div class=\"footer-note\">{}</div>\n", escape_html(f))))
            .chain(iter::once_with(article_footer)),
    )
}

fn article_header(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"{PAGE_LANG}\">\n<head>\n    <meta charset=\"UTF-8\">\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n    <title>{}</title>\n    <style>\n{ARTICLE_CSS}\n    </style>\n</head>\n<body>\n    <div class=\"container\">\n",
        escape_html(title)
    )
}

pub fn article_footer() -> String {
    "    </div>\n</body>\n</html>".to_string()
}

fn render_section(index: usize, section: &Section) -> String {
    let items: Vec<String> = section
        .items
        .iter()
        .map(|item| format!("                <li>- {}</li>", escape_html(item)))
        .collect();
    format!(
        "        <div class=\"section-block\">\n            <div class=\"section-title\">{:02} {}</div>\n            <ul class=\"list-content\">\n{}\n            </ul>\n        </div>\n",
        index + 1,
        escape_html(&section.title),
        items.join("\n")
    )
}

// --- Chat template ---

fn render_chat(doc: &ChatContent) -> Fragments<'_> {
    Box::new(
        iter::once_with(move || chat_page_header(doc.title.as_deref().unwrap_or(CHAT_FALLBACK_TITLE)))
            .chain(iter::once_with(move || {
                format!(
                    "        <div class=\"chat-header\">\n            {}\n        </div>\n        <div class=\"chat-messages\">\n",
                    escape_html(doc.chat_header.as_deref().unwrap_or(CHAT_FALLBACK_HEADER))
                )
            }))
            .chain(doc.messages.iter().map(render_message))
            .chain(iter::once_with(chat_page_footer)),
    )
}

fn chat_page_header(title: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"{PAGE_LANG}\">\n<head>\n    <meta charset=\"UTF-8\">\n    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n    <title>{}</title>\n    <style>\n{CHAT_CSS}\n    </style>\n</head>\n<body>\n    <div class=\"chat-container\">\n",
        escape_html(title)
    )
}

fn chat_page_footer() -> String {
    "        </div>\n    </div>\n</body>\n</html>".to_string()
}

fn render_message(message: &ChatMessage) -> String {
    match message {
        ChatMessage::TimeMarker { time } => format!("            <div class=\"message-time\">{}</div>\n", escape_html(time)),
        ChatMessage::Bubble { nickname, text, align, show_nickname } => {
            let nickname_html = if *show_nickname {
                format!("<div class=\"nickname\">{}</div>", escape_html(nickname))
            } else {
                String::new()
            };
            format!(
                "            <div class=\"message {}\">\n                <div class=\"avatar\" style=\"background-color: {}\">{}</div>\n                <div class=\"message-content\">\n                    {}\n                    <div class=\"message-bubble\">\n                        {}\n                    </div>\n                </div>\n            </div>\n",
                align.as_str(),
                avatar_color(nickname),
                escape_html(&avatar_text(nickname)),
                nickname_html,
                escape_html(text)
            )
        }
    }
}

/// Same palette index as the preview client: a 32-bit shift-and-subtract
/// hash over UTF-16 code units.
fn avatar_color(nickname: &str) -> &'static str {
    let hash = nickname.encode_utf16().fold(0i64, |hash, unit| {
        let shifted = i64::from((hash as i32).wrapping_shl(5));
        i64::from(unit) + shifted - hash
    });
    AVATAR_COLORS[(hash.unsigned_abs() % AVATAR_COLORS.len() as u64) as usize]
}

fn avatar_text(nickname: &str) -> String {
    nickname.chars().next().map_or_else(|| "?".to_string(), String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Align;
    use pretty_assertions::assert_eq;

    fn article(sections: Vec<Section>) -> ParsedContent {
        ParsedContent::Normal(NormalContent {
            title: Some("Tips & <Tricks>".into()),
            intro: Some("Say \"hi\"".into()),
            sections,
            footer: Some("It's done".into()),
        })
    }

    fn section(title: &str, items: &[&str]) -> Section {
        Section { title: title.into(), items: items.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn escapes_all_five_metacharacters_once() {
        assert_eq!(escape_html(r#"a&b<c>d"e'f"#), "a&amp;b&lt;c&gt;d&quot;e&#039;f");
        assert_eq!(escape_html("plain 文本"), "plain 文本");
        assert_eq!(escape_html("&amp;"), "&amp;amp;");
    }

    #[test]
    fn article_fragments_follow_page_order() {
        let doc = article(vec![section("First", &["a", "b"]), section("Second", &["c"])]);
        let fragments: Vec<String> = TemplateRenderer.render(&doc, TemplateKind::Normal).collect();

        assert_eq!(fragments.len(), 7);
        assert!(fragments[0].starts_with("<!DOCTYPE html>"));
        assert!(fragments[0].contains("<title>Tips &amp; &lt;Tricks&gt;</title>"));
        assert_eq!(fragments[1], "        <h1>Tips &amp; &lt;Tricks&gt;</h1>\n");
        assert_eq!(fragments[2], "        <p class=\"intro\">Say &quot;hi&quot;</p>\n");
        assert!(fragments[3].contains("<div class=\"section-title\">01 First</div>"));
        assert!(fragments[4].contains("<div class=\"section-title\">02 Second</div>"));
        assert_eq!(fragments[5], "        <div class=\"footer-note\">It&#039;s done</div>\n");
        assert_eq!(fragments[6], article_footer());
    }

    #[test]
    fn items_match_input_count_and_order() {
        let doc = article(vec![section("S", &["one", "two & three", "four"]), section("Empty", &[])]);
        let fragments: Vec<String> = TemplateRenderer.render(&doc, TemplateKind::Normal).collect();

        let first: Vec<&str> = fragments[3].lines().filter(|l| l.contains("<li>")).map(str::trim).collect();
        assert_eq!(first, vec!["<li>- one</li>", "<li>- two &amp; three</li>", "<li>- four</li>"]);
        assert_eq!(fragments[4].matches("<li>").count(), 0);
    }

    #[test]
    fn escaped_title_fills_title_tag_and_one_heading() {
        let doc = article(vec![section("S", &["x"])]);
        let page: String = TemplateRenderer.render(&doc, TemplateKind::Normal).collect();

        // Once in the document <title>, once as the visible heading.
        assert_eq!(page.matches("Tips &amp; &lt;Tricks&gt;").count(), 2);
        assert_eq!(page.matches("<title>Tips &amp; &lt;Tricks&gt;</title>").count(), 1);
        assert_eq!(page.matches("<h1>Tips &amp; &lt;Tricks&gt;</h1>").count(), 1);
        assert!(!page.contains("&amp;amp;"));
        assert!(!page.contains("<Tricks>"));
    }

    #[test]
    fn section_numbers_are_zero_padded() {
        let sections: Vec<Section> = (0..12).map(|i| section(&format!("S{i}"), &["x"])).collect();
        let page: String = TemplateRenderer.render(&article(sections), TemplateKind::Normal).collect();

        assert!(page.contains(">01 S0<"));
        assert!(page.contains(">09 S8<"));
        assert!(page.contains(">12 S11<"));
    }

    #[test]
    fn absent_optional_fields_are_skipped() {
        let doc = ParsedContent::Normal(NormalContent { sections: vec![section("S", &["x"])], ..Default::default() });
        let fragments: Vec<String> = TemplateRenderer.render(&doc, TemplateKind::Normal).collect();

        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].contains("<title>Article</title>"));
        assert!(fragments[1].contains("01 S"));
        assert_eq!(fragments[2], article_footer());
    }

    #[test]
    fn chat_fragments_cover_every_message() {
        let doc = ParsedContent::Chat(ChatContent {
            title: Some("Weekend".into()),
            chat_header: Some("Friends <3".into()),
            messages: vec![
                ChatMessage::TimeMarker { time: "10:30".into() },
                ChatMessage::Bubble { nickname: "Ann".into(), text: "Lunch?".into(), align: Align::Left, show_nickname: true },
                ChatMessage::Bubble { nickname: "Me".into(), text: "<sure>".into(), align: Align::Right, show_nickname: false },
            ],
        });
        let fragments: Vec<String> = TemplateRenderer.render(&doc, TemplateKind::Chat).collect();

        assert_eq!(fragments.len(), 6);
        assert!(fragments[0].contains("<title>Weekend</title>"));
        assert!(fragments[0].contains("chat-container"));
        assert!(fragments[1].contains("Friends &lt;3"));
        assert_eq!(fragments[2], "            <div class=\"message-time\">10:30</div>\n");
        assert!(fragments[3].contains("<div class=\"message left\">"));
        assert!(fragments[3].contains("<div class=\"nickname\">Ann</div>"));
        assert!(fragments[3].contains(">A</div>"));
        assert!(fragments[4].contains("<div class=\"message right\">"));
        assert!(!fragments[4].contains("class=\"nickname\""));
        assert!(fragments[4].contains("&lt;sure&gt;"));
        assert!(fragments[5].ends_with("</body>\n</html>"));
    }

    #[test]
    fn avatar_helpers() {
        assert_eq!(avatar_color("A"), AVATAR_COLORS[1]);
        assert_eq!(avatar_color(""), AVATAR_COLORS[0]);
        assert_eq!(avatar_color("张三"), avatar_color("张三"));
        assert_eq!(avatar_text("张三"), "张");
        assert_eq!(avatar_text(""), "?");
    }

    #[test]
    fn shape_wins_over_requested_kind() {
        let doc = article(vec![]);
        let page: String = TemplateRenderer.render(&doc, TemplateKind::Chat).collect();
        assert!(page.contains("<h1>"));
        assert!(!page.contains("chat-container"));
    }

    #[test]
    fn fallback_document_is_framed_like_success() {
        let err = ParseError { reason: "bad".into(), raw_text: "{not <json>".into() };
        let fragments: Vec<String> = TemplateRenderer.render_fallback(&err).collect();

        assert_eq!(fragments.len(), 3);
        assert!(fragments[0].contains("<title>Content generation</title>"));
        assert!(fragments[1].contains("<pre>{not &lt;json&gt;</pre>"));
        assert_eq!(fragments.last(), Some(&article_footer()));
    }
}
