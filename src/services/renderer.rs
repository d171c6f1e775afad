use crate::core::script::{GlossaryEntry, Script};
use serde::{Deserialize, Serialize};

/// Label shown when nothing is playing.
pub const IDLE_LABEL: &str = "准备就绪";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Hook,
    Summary,
    Story,
    Takeaway,
    Action,
    Wisdom,
}

/// One independently playable unit of a script. `index` is its position in
/// the rendered sequence and the key the page uses to find its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub kind: SegmentKind,
    pub title: Option<String>,
    pub text: String,
}

impl Segment {
    /// The "now playing" label.
    pub fn label(&self) -> String {
        match self.kind {
            SegmentKind::Hook => "🌙 开场".to_string(),
            SegmentKind::Summary => "📖 今天的故事".to_string(),
            SegmentKind::Story => self
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "故事".to_string()),
            SegmentKind::Takeaway => "💝 爸爸的叮嘱".to_string(),
            SegmentKind::Action => "🌟 明天试试看".to_string(),
            SegmentKind::Wisdom => "🌙 晚安寄语".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayItem {
    pub segment: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayBlock {
    Hook { segment: usize, text: String },
    Summary { segment: usize, text: String },
    Story { segment: usize, number: usize, title: String, content: String },
    Takeaways(Vec<DisplayItem>),
    Actions(Vec<DisplayItem>),
    Wisdom { segment: usize, text: String },
    Glossary(Vec<GlossaryEntry>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayDocument {
    pub title: String,
    pub duration: Option<String>,
    pub blocks: Vec<DisplayBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedScript {
    pub segments: Vec<Segment>,
    pub document: DisplayDocument,
}

struct SegmentBuilder {
    segments: Vec<Segment>,
}

impl SegmentBuilder {
    fn push(&mut self, kind: SegmentKind, title: Option<&str>, text: &str) -> usize {
        let index = self.segments.len();
        self.segments.push(Segment {
            index,
            kind,
            title: title.map(str::to_string),
            text: text.to_string(),
        });
        index
    }
}

/// Flattens a script into playable segments and the blocks displaying them.
///
/// Order is fixed: hook, summary, story chapters, takeaways, action steps,
/// wisdom. Absent parts produce neither a segment nor a block.
pub fn render(script: &Script) -> RenderedScript {
    let mut builder = SegmentBuilder { segments: Vec::new() };
    let mut blocks = Vec::new();

    if let Some(hook) = script.hook() {
        let segment = builder.push(SegmentKind::Hook, None, hook);
        blocks.push(DisplayBlock::Hook { segment, text: hook.to_string() });
    }

    if let Some(summary) = script.summary() {
        let segment = builder.push(SegmentKind::Summary, None, summary);
        blocks.push(DisplayBlock::Summary { segment, text: summary.to_string() });
    }

    for (i, section) in script.story.iter().enumerate() {
        let segment = builder.push(SegmentKind::Story, Some(&section.section), &section.content);
        blocks.push(DisplayBlock::Story {
            segment,
            number: i + 1,
            title: section.section.clone(),
            content: section.content.clone(),
        });
    }

    let takeaways: Vec<DisplayItem> = script
        .key_takeaways
        .iter()
        .map(|text| DisplayItem {
            segment: builder.push(SegmentKind::Takeaway, None, text),
            text: text.clone(),
        })
        .collect();
    if !takeaways.is_empty() {
        blocks.push(DisplayBlock::Takeaways(takeaways));
    }

    let actions: Vec<DisplayItem> = script
        .actionable_steps
        .iter()
        .map(|text| DisplayItem {
            segment: builder.push(SegmentKind::Action, None, text),
            text: text.clone(),
        })
        .collect();
    if !actions.is_empty() {
        blocks.push(DisplayBlock::Actions(actions));
    }

    if let Some(wisdom) = script.bedtime_wisdom() {
        let segment = builder.push(SegmentKind::Wisdom, None, wisdom);
        blocks.push(DisplayBlock::Wisdom { segment, text: wisdom.to_string() });
    }

    if !script.glossary.is_empty() {
        blocks.push(DisplayBlock::Glossary(script.glossary.clone()));
    }

    RenderedScript {
        segments: builder.segments,
        document: DisplayDocument {
            title: script.title.clone(),
            duration: script.duration_estimate().map(|d| format!("预计 {}", d)),
            blocks,
        },
    }
}

impl DisplayDocument {
    /// Ordinals of every clickable block, in display order.
    pub fn segment_ids(&self) -> Vec<usize> {
        let mut ids = Vec::new();
        for block in &self.blocks {
            match block {
                DisplayBlock::Hook { segment, .. }
                | DisplayBlock::Summary { segment, .. }
                | DisplayBlock::Story { segment, .. }
                | DisplayBlock::Wisdom { segment, .. } => ids.push(*segment),
                DisplayBlock::Takeaways(items) | DisplayBlock::Actions(items) => {
                    ids.extend(items.iter().map(|item| item.segment))
                }
                DisplayBlock::Glossary(_) => {}
            }
        }
        ids
    }

    /// Static markup for the script. Every piece of script text is escaped.
    pub fn to_html(&self) -> String {
        let mut html = format!("<h1 class=\"script-title\">{}</h1>", escape_html(&self.title));

        for block in &self.blocks {
            match block {
                DisplayBlock::Hook { segment, text } => {
                    html.push_str(&format!(
                        "<div class=\"script-hook\" data-segment=\"{}\">🌙 {}</div>",
                        segment,
                        escape_html(text)
                    ));
                }
                DisplayBlock::Summary { segment, text } => {
                    html.push_str(&format!(
                        "<div class=\"script-summary\" data-segment=\"{}\">\
                         <div class=\"script-summary-label\">今天的故事</div>\
                         <div>{}</div></div>",
                        segment,
                        escape_html(text)
                    ));
                }
                DisplayBlock::Story { segment, number, title, content } => {
                    html.push_str(&format!(
                        "<div class=\"story-section\" data-segment=\"{}\">\
                         <div class=\"section-header\">\
                         <span class=\"section-number\">{}</span>\
                         <span class=\"section-title\">{}</span></div>\
                         <div class=\"section-content\">{}</div></div>",
                        segment,
                        number,
                        escape_html(title),
                        escape_html(content)
                    ));
                }
                DisplayBlock::Takeaways(items) => {
                    html.push_str(&item_group("takeaways-section", "takeaway-item", "💝 爸爸的叮嘱", "💫", items));
                }
                DisplayBlock::Actions(items) => {
                    html.push_str(&item_group("actions-section", "action-item", "🌟 明天试试看", "✨", items));
                }
                DisplayBlock::Wisdom { segment, text } => {
                    html.push_str(&format!(
                        "<div class=\"bedtime-wisdom\" data-segment=\"{}\">\
                         <div class=\"wisdom-icon\">🌙</div>\
                         <div class=\"wisdom-text\">{}</div></div>",
                        segment,
                        escape_html(text)
                    ));
                }
                DisplayBlock::Glossary(entries) => {
                    html.push_str("<div class=\"glossary-section\"><div class=\"section-label\">📖 小知识</div>");
                    for entry in entries {
                        html.push_str(&format!(
                            "<div class=\"glossary-item\">\
                             <div class=\"glossary-term\">{}</div>\
                             <div class=\"glossary-explanation\">{}</div></div>",
                            escape_html(&entry.term),
                            escape_html(&entry.explanation)
                        ));
                    }
                    html.push_str("</div>");
                }
            }
        }

        html
    }
}

fn item_group(section: &str, item_class: &str, label: &str, icon: &str, items: &[DisplayItem]) -> String {
    let mut html = format!("<div class=\"{}\"><div class=\"section-label\">{}</div>", section, label);
    for item in items {
        html.push_str(&format!(
            "<div class=\"{}\" data-segment=\"{}\">\
             <span class=\"item-icon\">{}</span>\
             <span class=\"item-text\">{}</span></div>",
            item_class,
            item.segment,
            icon,
            escape_html(&item.text)
        ));
    }
    html.push_str("</div>");
    html
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
