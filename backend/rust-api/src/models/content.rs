use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field the CMS uses for a test's correct alternative. Never leaves the API.
pub const CORRECT_ANSWER_FIELD: &str = "alternativa_certa";

/// Anything ordered among its siblings by a 1-based `ordem`.
pub trait Sequenced {
    fn id(&self) -> i64;
    fn ordem(&self) -> i64;
}

/// Sequence number that follows `current`, or 1 when nothing is current.
pub fn next_sequence_number<T: Sequenced>(current: Option<&T>) -> i64 {
    current.map(|node| node.ordem() + 1).unwrap_or(1)
}

/// Exact match on `ordem`. Gaps and duplicates yield no match.
pub fn find_by_ordem<T: Sequenced>(nodes: &[T], ordem: i64) -> Option<&T> {
    let mut matches = nodes.iter().filter(|node| node.ordem() == ordem);
    match (matches.next(), matches.next()) {
        (Some(node), None) => Some(node),
        _ => None,
    }
}

pub fn find_by_id<T: Sequenced>(nodes: &[T], id: i64) -> Option<&T> {
    nodes.iter().find(|node| node.id() == id)
}

/// Reference to a part as listed inside a lesson.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartRef {
    pub id: i64,
    pub ordem: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmsLesson {
    pub id: i64,
    pub ordem: i64,
    #[serde(default)]
    pub partes: Vec<PartRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmsPart {
    pub id: i64,
    pub ordem: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Test as delivered by the CMS, correct answer included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmsTest {
    pub id: i64,
    pub ordem: i64,
    #[serde(rename = "alternativa_certa", default)]
    pub correct_answer: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Test safe to hand to a student: the correct answer is not representable.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RedactedTest {
    pub id: i64,
    pub ordem: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CmsTest {
    pub fn redact(self) -> RedactedTest {
        let mut extra = self.extra;
        extra.remove(CORRECT_ANSWER_FIELD);
        RedactedTest {
            id: self.id,
            ordem: self.ordem,
            extra,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CmsCourse {
    pub id: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Sequenced for CmsLesson {
    fn id(&self) -> i64 {
        self.id
    }
    fn ordem(&self) -> i64 {
        self.ordem
    }
}

impl Sequenced for PartRef {
    fn id(&self) -> i64 {
        self.id
    }
    fn ordem(&self) -> i64 {
        self.ordem
    }
}

impl Sequenced for CmsPart {
    fn id(&self) -> i64 {
        self.id
    }
    fn ordem(&self) -> i64 {
        self.ordem
    }
}

impl Sequenced for CmsTest {
    fn id(&self) -> i64 {
        self.id
    }
    fn ordem(&self) -> i64 {
        self.ordem
    }
}
