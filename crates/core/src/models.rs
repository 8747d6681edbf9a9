use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    AdmissionInfo,
    FeeInfo,
    CourseInfo,
    FacilityInfo,
    CampusInfo,
    FacultyInfo,
    PlacementInfo,
    ScholarshipInfo,
    HostelInfo,
    DocumentsRequired,
    ApplicationDeadline,
    EntranceExamInfo,
    ContactInfo,
    Goodbye,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 16] = [
        Intent::Greeting,
        Intent::AdmissionInfo,
        Intent::FeeInfo,
        Intent::CourseInfo,
        Intent::FacilityInfo,
        Intent::CampusInfo,
        Intent::FacultyInfo,
        Intent::PlacementInfo,
        Intent::ScholarshipInfo,
        Intent::HostelInfo,
        Intent::DocumentsRequired,
        Intent::ApplicationDeadline,
        Intent::EntranceExamInfo,
        Intent::ContactInfo,
        Intent::Goodbye,
        Intent::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::AdmissionInfo => "admission_info",
            Self::FeeInfo => "fee_info",
            Self::CourseInfo => "course_info",
            Self::FacilityInfo => "facility_info",
            Self::CampusInfo => "campus_info",
            Self::FacultyInfo => "faculty_info",
            Self::PlacementInfo => "placement_info",
            Self::ScholarshipInfo => "scholarship_info",
            Self::HostelInfo => "hostel_info",
            Self::DocumentsRequired => "documents_required",
            Self::ApplicationDeadline => "application_deadline",
            Self::EntranceExamInfo => "entrance_exam_info",
            Self::ContactInfo => "contact_info",
            Self::Goodbye => "goodbye",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str() == wanted)
    }
}

/// Keyword bucket shared by the normalizer and the classifier fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Admission,
    Fees,
    Scholarship,
    Courses,
    Facilities,
    Campus,
    Faculty,
    Placement,
    Documents,
    Deadline,
    Entrance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Numbers,
    Emails,
    Years,
    Percentages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedInput {
    pub original_text: String,
    pub tokens: Vec<String>,
    pub clean_tokens: Vec<String>,
    pub categories: BTreeMap<Category, Vec<String>>,
    pub entities: BTreeMap<EntityKind, Vec<String>>,
    pub word_count: usize,
    pub clean_word_count: usize,
}

impl NormalizedInput {
    pub fn has_category(&self, category: Category) -> bool {
        self.categories.contains_key(&category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    pub confidence: f32,
    pub scores: BTreeMap<Intent, f32>,
}

impl ClassificationResult {
    pub fn unknown(scores: BTreeMap<Intent, f32>) -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            scores,
        }
    }

    /// Replaces the reported per-intent scores, keeping the decision.
    pub fn with_scores(mut self, scores: BTreeMap<Intent, f32>) -> Self {
        self.scores = scores;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Local,
    External,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseBundle {
    pub response: String,
    pub suggestions: Vec<String>,
    pub intent: Intent,
    pub confidence: f32,
    pub source: ResponseSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(flatten)]
    pub bundle: ResponseBundle,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub user_message: String,
    pub bot_response: String,
    pub intent: Intent,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub history_length: usize,
    pub interests: Vec<String>,
    pub asked_topics: Vec<String>,
    pub message_count: u64,
    pub last_activity: DateTime<Utc>,
    pub idle_seconds: i64,
}
