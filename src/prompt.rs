use crate::models::TemplateKind;

/// Persona sent as the system message of every completion request.
pub const SYSTEM_PERSONA: &str =
    "You are a professional content-creation assistant. You write accurate, well-structured content and always answer with exactly the JSON document you are asked for.";

pub fn build(topic: &str, description: &str, kind: TemplateKind) -> String {
    match kind {
        TemplateKind::Normal => build_normal_prompt(topic, description),
        TemplateKind::Chat => build_chat_prompt(topic, description),
    }
}

fn build_normal_prompt(topic: &str, description: &str) -> String {
    format!(
        r#"Write an article from the information below and return it as JSON.

Topic: {topic}
Description: {description}

Return exactly this JSON shape:
{{
  "title": "Article title",
  "intro": "A one-paragraph introduction",
  "sections": [
    {{
      "title": "Section title",
      "items": ["Point 1", "Point 2", "Point 3"]
    }}
  ],
  "footer": "Closing remarks"
}}

Requirements:
1. The output must be valid JSON that a strict JSON parser accepts as-is.
2. Every string value must stay on a single line; do not put newline characters inside strings.
3. Do not wrap the JSON in ```json``` code-fence markers.
4. The sections array must contain 2-6 sections.
5. Each section must contain 2-8 items.
6. Content must be professional, accurate and substantive.
7. Output only the JSON object and nothing else."#
    )
}

fn build_chat_prompt(topic: &str, description: &str) -> String {
    format!(
        r#"Write a messenger chat transcript from the information below and return it as JSON.

Scene: {topic}
Requirements for the conversation: {description}

Return exactly this JSON shape:
{{
  "title": "Page title",
  "chat_header": "Chat title",
  "messages": [
    {{"type": "time", "time": "10:30"}},
    {{"nickname": "Alex", "text": "Message text", "align": "left"}},
    {{"nickname": "Me", "text": "Reply text", "align": "right"}},
    {{"nickname": "Alex", "text": "Follow-up", "align": "left", "showNickname": false}}
  ]
}}

Requirements:
1. The output must be valid JSON that a strict JSON parser accepts as-is.
2. Every string value must stay on a single line; do not put newline characters inside strings.
3. Do not wrap the JSON in ```json``` code-fence markers.
4. The messages array must contain 5-15 messages.
5. A message with "type": "time" is a time divider; "align": "left" is the other person, "align": "right" is me.
6. The dialogue must read naturally.
7. Output only the JSON object and nothing else."#
    )
}
