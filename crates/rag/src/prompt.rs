use std::collections::HashSet;
use std::env;

use serde::Serialize;

use ibtikar_core::contains_arabic;
use ibtikar_index::Chunk;

pub const SYSTEM_PROMPT_EN: &str = "You are 'Ibtikar Chatbot'. Answer professionally and helpfully.\n\
STYLE:\n\
- Use short headings and bullet points.\n\
- Prefer naming resources over raw URLs. When adding a link, use Markdown: [Label](https://full.url); do not write bare domains.\n\
DEPTH:\n\
- Aim for ~200-300 words: 1-2 sentence intro + 5-8 concise bullets + a short closing line.\n\
CONTEXT USE:\n\
- Base answers ONLY on the provided context snippets. If a fact is missing, say so plainly and suggest the closest relevant info.\n\
FORBIDDEN:\n\
- Never reveal chain-of-thought or internal analysis.\n";

pub const SYSTEM_PROMPT_AR: &str = "أنت 'روبوت تجمّع ابتكار'. أجب باحترافية وبإيجاز مفيد.\n\
الأسلوب:\n\
- استخدم عناوين فرعية ونقاطًا مختصرة.\n\
- عند إدراج الروابط استخدم ماركداون: [اسم واضح](https://الرابط) ولا تكتب نطاقًا دون https.\n\
العمق:\n\
- نحو ٢٠٠-٣٠٠ كلمة: تمهيد قصير + ٥-٨ نقاط موجزة + سطر ختامي.\n\
استخدام السياق:\n\
- اعتمد فقط على المقاطع المتاحة. إن غابت المعلومة فاذكر ذلك واقترح أقرب بديل.\n\
ممنوع:\n\
- عدم إظهار التفكير الداخلي أو التحليل.\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Ar,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Ar => "ar",
        }
    }
}

pub fn detect_language(text: &str) -> Lang {
    if contains_arabic(text) {
        Lang::Ar
    } else {
        Lang::En
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Replaces both built-in system prompts.
    pub system_override: Option<String>,
    /// Ask the model to end with its own sources section.
    pub inline_sources: bool,
}

impl PromptOptions {
    pub fn from_env() -> Self {
        Self {
            system_override: env::var("SYSTEM_PROMPT").ok().filter(|s| !s.trim().is_empty()),
            inline_sources: env::var("INLINE_SOURCES")
                .map(|v| v.trim() == "1")
                .unwrap_or(false),
        }
    }

    pub fn system_prompt(&self, lang: Lang) -> String {
        if let Some(custom) = &self.system_override {
            return custom.clone();
        }
        match lang {
            Lang::En => SYSTEM_PROMPT_EN.to_string(),
            Lang::Ar => SYSTEM_PROMPT_AR.to_string(),
        }
    }
}

/// Grounding context: each chunk's text followed by its source.
pub fn build_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .filter_map(|chunk| {
            let body = chunk.text.trim();
            if body.is_empty() {
                return None;
            }
            if chunk.source.is_empty() {
                Some(body.to_string())
            } else {
                Some(format!("{body}\n\n(Source: {})", chunk.source))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn unique_sources(chunks: &[Chunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for chunk in chunks {
        if !chunk.source.is_empty() && seen.insert(chunk.source.as_str()) {
            out.push(chunk.source.clone());
        }
    }
    out
}

pub fn no_context_reply(lang: Lang) -> &'static str {
    match lang {
        Lang::En => "This information isn't available in our indexed sources. Try a more specific question or ask me to re-ingest the sources.",
        Lang::Ar => "المعلومة غير متوفّرة في مصادرنا الحالية. جرّب سؤالًا أدق، أو اطلب إعادة فهرسة للمصادر.",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundedPrompt {
    pub lang: Lang,
    pub system: String,
    pub user: String,
    pub sources: Vec<String>,
}

impl GroundedPrompt {
    /// `None` when there is nothing to ground the answer on.
    pub fn compose(question: &str, chunks: &[Chunk], options: &PromptOptions) -> Option<Self> {
        let context = build_context(chunks);
        if context.is_empty() {
            return None;
        }
        let lang = detect_language(question);
        let sources = unique_sources(chunks);
        let source_hint = if sources.is_empty() {
            "-".to_string()
        } else {
            sources
                .iter()
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let directive = match lang {
            Lang::En => "Respond in English.",
            Lang::Ar => "أجب باللغة العربية.",
        };
        let sources_rule = if options.inline_sources {
            "End your answer with a short '**Sources**' section (use Markdown links).\n"
        } else {
            "Do NOT include a 'Sources' section; the app will render sources below the answer.\n"
        };
        let user = format!(
            "Use the following context to answer the user accurately. \
             Answer ONLY with facts present in the context. If information is missing, say it is not available.\n\n\
             Context:\n{context}\n\n\
             Known sources (for reference only, do not invent new ones):\n{source_hint}\n\n\
             Question: {question}\n{directive}\n{sources_rule}Answer:",
            question = question.trim()
        );
        Some(Self {
            lang,
            system: options.system_prompt(lang),
            user,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks() -> Vec<Chunk> {
        vec![
            Chunk::new("https://ibtikar.org.tr/about", "Ibtikar was founded in 2022."),
            Chunk::new("https://ibtikar.org.tr/about", "Core values: Quality."),
            Chunk::new("gdoc:1", "  "),
            Chunk::new("", "Untracked note."),
        ]
    }

    #[test]
    fn detects_arabic_questions() {
        assert_eq!(detect_language("متى تأسست ابتكار؟"), Lang::Ar);
        assert_eq!(detect_language("When was Ibtikar founded?"), Lang::En);
    }

    #[test]
    fn context_skips_blank_chunks_and_tags_sources() {
        let context = build_context(&chunks());
        assert!(context.starts_with("Ibtikar was founded in 2022.\n\n(Source: https://ibtikar.org.tr/about)"));
        assert!(context.ends_with("Untracked note."));
        assert!(!context.contains("gdoc:1"));
    }

    #[test]
    fn sources_are_unique_in_order() {
        let mut input = chunks();
        input.push(Chunk::new("gdoc:1", "again"));
        assert_eq!(
            unique_sources(&input),
            vec!["https://ibtikar.org.tr/about".to_string(), "gdoc:1".to_string()]
        );
    }

    #[test]
    fn compose_returns_none_without_context() {
        assert!(GroundedPrompt::compose("q", &[], &PromptOptions::default()).is_none());
    }

    #[test]
    fn compose_picks_language_and_system_prompt() {
        let prompt =
            GroundedPrompt::compose("متى تأسست ابتكار؟", &chunks(), &PromptOptions::default())
                .unwrap();
        assert_eq!(prompt.lang, Lang::Ar);
        assert_eq!(prompt.system, SYSTEM_PROMPT_AR);
        assert!(prompt.user.contains("أجب باللغة العربية."));
        assert!(prompt.user.contains("Do NOT include a 'Sources' section"));
        assert!(prompt.user.ends_with("Answer:"));

        let options = PromptOptions {
            system_override: Some("custom".into()),
            inline_sources: true,
        };
        let prompt = GroundedPrompt::compose("When?", &chunks(), &options).unwrap();
        assert_eq!(prompt.system, "custom");
        assert!(prompt.user.contains("'**Sources**'"));
    }
}
