use std::fmt::Display;

use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    /// Strict lookup; `None` for names outside low/medium/high.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "low" => Some(Tier::Low),
            "medium" => Some(Tier::Medium),
            "high" => Some(Tier::High),
            _ => None,
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format!("{:?}", self).to_lowercase())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EncodingProfile {
    pub tier: Tier,
    pub crf: u8,
    pub preset: &'static str,
}

impl EncodingProfile {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Low => EncodingProfile { tier, crf: 28, preset: "veryfast" },
            Tier::Medium => EncodingProfile { tier, crf: 23, preset: "medium" },
            Tier::High => EncodingProfile { tier, crf: 18, preset: "slow" },
        }
    }

    /// Unknown tier names fall back to medium.
    pub fn resolve(name: &str) -> Self {
        match Tier::parse(name) {
            Some(tier) => EncodingProfile::for_tier(tier),
            None => {
                warn!(tier = name, "unknown tier, using medium");
                EncodingProfile::for_tier(Tier::Medium)
            },
        }
    }

    pub fn video_parameters(&self) -> Vec<String> {
        vec![
            String::from("-c:v"), String::from("libx264"),
            String::from("-crf"), self.crf.to_string(),
            String::from("-preset"), String::from(self.preset),
        ]
    }
}
