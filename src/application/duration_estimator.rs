pub const DEFAULT_DURATION_MINUTES: u32 = 30;

/// Marker groups in priority order; the first group with a hit wins.
const DURATION_RULES: &[(&[&str], u32)] = &[
    (
        &[
            "write",
            "writing",
            "design",
            "review",
            "draft",
            "research",
            "implement",
            "prepare",
            "study",
        ],
        90,
    ),
    (&["meeting", "appointment", "interview", "workshop"], 60),
    (&["exercise", "gym", "workout", "run", "yoga"], 60),
    (&["grocery", "groceries", "shopping", "errand", "errands"], 45),
    (&["call", "email", "reply", "message", "text"], 30),
];

/// Keyword-driven task length guess. Same text, same answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationEstimator {
    default_minutes: u32,
}

impl Default for DurationEstimator {
    fn default() -> Self {
        Self {
            default_minutes: DEFAULT_DURATION_MINUTES,
        }
    }
}

impl DurationEstimator {
    pub fn new(default_minutes: u32) -> Self {
        Self {
            default_minutes: default_minutes.max(1),
        }
    }

    pub fn estimate(&self, title: &str, description: Option<&str>) -> u32 {
        let words = tokenize(title, description);
        DURATION_RULES
            .iter()
            .find(|(markers, _)| contains_any(&words, markers))
            .map(|(_, minutes)| *minutes)
            .unwrap_or(self.default_minutes)
    }
}

pub fn estimate(title: &str, description: Option<&str>) -> u32 {
    DurationEstimator::default().estimate(title, description)
}

/// Lowercased alphanumeric words of title and description.
pub(crate) fn tokenize(title: &str, description: Option<&str>) -> Vec<String> {
    let combined = format!("{title} {}", description.unwrap_or_default());
    combined
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub(crate) fn contains_any(words: &[String], markers: &[&str]) -> bool {
    markers
        .iter()
        .any(|marker| words.iter().any(|word| word == marker))
}
