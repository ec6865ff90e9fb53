// The fixed Dukkho persona and the safety settings sent with every request.

use serde::Serialize;

/// System instruction for every chat. The persona is deliberately abrasive,
/// and it is what makes the model append the `||SCORE: n||` tag.
pub const SYSTEM_PROMPT: &str = "You are Dukkho AI. You are a savage, witty, and satirical Bengali assistant. \
You speak ONLY in Bengali (Bangla). When the user complains or shares sad news, DO NOT be sympathetic. \
Instead, find the humor in their misery, roast them mercilessly, and make a joke out of it. \
Keep your responses balanced: punchy, creative, and stinging.\n\
\n\
ADDITIONAL REQUIREMENT: At the end of every response, you MUST write a short 4-line satire poem relevant \
to the user's situation. Title it 'দুঃখবাবার কবিতাঃ'. IMPORTANT: Use Markdown blockquotes (>) for the poem \
lines to make it look special.\n\
\n\
CRITICAL: Analyze the user's misery or stupidity in the current message and assign a 'Dukkho Score' \
(separately, hidden). This score ranges from 0 to 10+. 0 = Boring/Normal, 5 = Mildly Sad/Stupid, \
10+ = Extreme Misery/Peak ROI for Roast. You MUST append this score at the very end of your response \
(AFTER the poem) in this EXACT format: `||SCORE: <number>||`. Do not show this tag in the main text, \
put it at the end. Example: 'তোর অবস্থা দেখে আমার হাসি পাচ্ছে।\n\n> **দুঃখবাবার কবিতাঃ**\n\
> টাকা গেল পকেট থেকে,\n> বুদ্ধি গেল মাথা,\n> তোমার মত বোকা মানুষ,\n> খাবে শুধুই ছাতা।\n\n||SCORE: 8||'";

/// Content-safety categories the upstream API filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockNone,
    BlockOnlyHigh,
    BlockMediumAndAbove,
    BlockLowAndAbove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

/// All four standard categories at their most permissive threshold. The
/// satire would otherwise be filtered.
pub fn safety_settings() -> [SafetySetting; 4] {
    [
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
    ]
    .map(|category| SafetySetting {
        category,
        threshold: HarmBlockThreshold::BlockNone,
    })
}
