//! Static configuration tables, deserialized once at startup.
//!
//! The bundled tables live in `crates/core/data/*.json`. A deployment can
//! point at a directory holding the same four files to replace them.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{Category, Intent};

const BUNDLED_VOCABULARY: &str = include_str!("../data/vocabulary.json");
const BUNDLED_INTENTS: &str = include_str!("../data/intents.json");
const BUNDLED_COLLEGE: &str = include_str!("../data/college.json");
const BUNDLED_CONTEXT: &str = include_str!("../data/context.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    pub stop_words: BTreeSet<String>,
    pub lemmas: BTreeMap<String, String>,
    pub categories: BTreeMap<Category, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentSpec {
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Categories whose presence supports this intent.
    #[serde(default)]
    pub categories: Vec<Category>,
    pub responses: Vec<String>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryFallback {
    pub category: Category,
    pub intent: Intent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentTable {
    pub intents: BTreeMap<Intent, IntentSpec>,
    /// Checked in order when the best score falls under the confidence floor.
    pub category_fallback: Vec<CategoryFallback>,
}

impl IntentTable {
    pub fn spec(&self, intent: Intent) -> Option<&IntentSpec> {
        self.intents.get(&intent)
    }

    /// Intents that can be trained. `Unknown` is a sentinel and never scored.
    pub fn trainable(&self) -> impl Iterator<Item = (Intent, &IntentSpec)> {
        self.intents
            .iter()
            .filter(|(intent, _)| **intent != Intent::Unknown)
            .map(|(intent, spec)| (*intent, spec))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionFacts {
    pub application_open_date: String,
    pub final_deadline: String,
    pub entrance_exams: Vec<String>,
    pub documents_required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeFacts {
    pub tuition_per_year: String,
    pub other_fees: String,
    pub hostel_fee: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactFacts {
    pub phone: String,
    pub email: String,
    pub address: String,
    pub office_hours: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollegeFacts {
    pub name: String,
    pub established: String,
    pub location: String,
    pub accreditation: String,
    pub ranking: String,
    pub student_count: String,
    pub faculty_count: String,
    pub campus_size: String,
    pub admissions: AdmissionFacts,
    pub fees: FeeFacts,
    pub contact: ContactFacts,
    pub departments: Vec<String>,
}

impl CollegeFacts {
    /// Flattened `{placeholder}` values, nested records addressed as `admissions.final_deadline`.
    pub fn template_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            fields.insert(key.to_string(), value);
        };

        put("name", self.name.clone());
        put("established", self.established.clone());
        put("location", self.location.clone());
        put("accreditation", self.accreditation.clone());
        put("ranking", self.ranking.clone());
        put("student_count", self.student_count.clone());
        put("faculty_count", self.faculty_count.clone());
        put("campus_size", self.campus_size.clone());
        put("departments", self.departments.join(", "));

        put(
            "admissions.application_open_date",
            self.admissions.application_open_date.clone(),
        );
        put(
            "admissions.final_deadline",
            self.admissions.final_deadline.clone(),
        );
        put(
            "admissions.entrance_exams",
            self.admissions.entrance_exams.join(", "),
        );
        put(
            "admissions.documents_required",
            self.admissions.documents_required.join(", "),
        );

        put("fees.tuition_per_year", self.fees.tuition_per_year.clone());
        put("fees.other_fees", self.fees.other_fees.clone());
        put("fees.hostel_fee", self.fees.hostel_fee.clone());

        put("contact.phone", self.contact.phone.clone());
        put("contact.email", self.contact.email.clone());
        put("contact.address", self.contact.address.clone());
        put("contact.office_hours", self.contact.office_hours.clone());

        fields
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestSuggestion {
    pub interest: String,
    /// Suppressed once this topic has been asked about.
    pub unless_topic: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTables {
    pub interests: BTreeMap<String, Vec<String>>,
    pub topics: BTreeMap<String, Vec<String>>,
    /// The universal topic set and the follow-up question for each topic.
    pub topic_suggestions: BTreeMap<String, String>,
    pub interest_suggestions: Vec<InterestSuggestion>,
    /// Offered to a session the tracker has never seen.
    pub opening_suggestions: Vec<String>,
    pub default_suggestions: Vec<String>,
    #[serde(default = "default_topic_picks")]
    pub max_topic_suggestions: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

fn default_topic_picks() -> usize {
    3
}

fn default_max_suggestions() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub vocabulary: Vocabulary,
    pub intents: IntentTable,
    pub college: CollegeFacts,
    pub context: ContextTables,
}

impl KnowledgeBase {
    pub fn builtin() -> Result<Self> {
        let knowledge = Self {
            vocabulary: parse_table("vocabulary.json", BUNDLED_VOCABULARY)?,
            intents: parse_table("intents.json", BUNDLED_INTENTS)?,
            college: parse_table("college.json", BUNDLED_COLLEGE)?,
            context: parse_table("context.json", BUNDLED_CONTEXT)?,
        };
        knowledge.validate()?;
        Ok(knowledge)
    }

    pub fn from_dir(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref();
        let knowledge = Self {
            vocabulary: read_table(root, "vocabulary.json")?,
            intents: read_table(root, "intents.json")?,
            college: read_table(root, "college.json")?,
            context: read_table(root, "context.json")?,
        };
        knowledge.validate()?;
        Ok(knowledge)
    }

    pub fn load(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::builtin(),
        }
    }

    fn validate(&self) -> Result<()> {
        let unknown = self
            .intents
            .spec(Intent::Unknown)
            .context("intent table is missing the `unknown` entry")?;
        if unknown.responses.is_empty() {
            anyhow::bail!("`unknown` intent needs at least one response template");
        }
        if self.intents.trainable().next().is_none() {
            anyhow::bail!("intent table has no trainable intents");
        }
        if self.context.default_suggestions.is_empty()
            || self.context.opening_suggestions.is_empty()
        {
            anyhow::bail!("context tables need default suggestions");
        }
        Ok(())
    }
}

fn parse_table<T: DeserializeOwned>(name: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("invalid knowledge table {name}"))
}

fn read_table<T: DeserializeOwned>(root: &Path, name: &str) -> Result<T> {
    let path = root.join(name);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading knowledge table at {}", path.display()))?;
    parse_table(name, &raw)
}
