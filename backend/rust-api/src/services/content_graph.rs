use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::metrics::track_cms_request;
use crate::models::{CmsCourse, CmsLesson, CmsPart, CmsTest, PartRef};

/// Read-only view of the Course -> Lesson -> Part -> Test hierarchy.
#[async_trait]
pub trait ContentGraph: Send + Sync {
    async fn lessons_by_course(&self, course_id: i64) -> Result<Vec<CmsLesson>>;
    async fn parts_by_lesson(&self, lesson_id: i64) -> Result<Vec<CmsPart>>;
    async fn tests_by_part(&self, part_id: i64) -> Result<Vec<CmsTest>>;
    async fn lesson_by_id(&self, lesson_id: i64) -> Result<CmsLesson>;
    async fn part_by_id(&self, part_id: i64) -> Result<CmsPart>;
    async fn test_by_id(&self, test_id: i64) -> Result<CmsTest>;
    async fn courses_by_ids(&self, course_ids: &[i64]) -> Result<Vec<CmsCourse>>;
}

/// HTTP client for the headless CMS that owns course content.
pub struct CmsClient {
    http_client: Client,
    base_url: Url,
    timeout: Duration,
}

impl CmsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid CMS base URL: {}", base_url))?;

        Ok(Self {
            http_client: Client::new(),
            base_url,
            timeout,
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("Invalid CMS path: {}", path))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, resource: &str, url: Url) -> Result<T> {
        track_cms_request(resource, async {
            tracing::debug!("CMS request: GET {}", url);

            let response = self
                .http_client
                .get(url.clone())
                .timeout(self.timeout)
                .send()
                .await
                .with_context(|| format!("Failed to call CMS {}", resource))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(anyhow!(
                    "CMS returned error {} for {}: {}",
                    status,
                    url,
                    error_text
                ));
            }

            response
                .json::<T>()
                .await
                .with_context(|| format!("Failed to parse CMS {} response", resource))
        })
        .await
    }
}

#[async_trait]
impl ContentGraph for CmsClient {
    async fn lessons_by_course(&self, course_id: i64) -> Result<Vec<CmsLesson>> {
        let url = self.endpoint("licoes", &[("curso", course_id.to_string())])?;
        self.get_json("lessons", url).await
    }

    async fn parts_by_lesson(&self, lesson_id: i64) -> Result<Vec<CmsPart>> {
        let url = self.endpoint("partes", &[("licao", lesson_id.to_string())])?;
        self.get_json("parts", url).await
    }

    async fn tests_by_part(&self, part_id: i64) -> Result<Vec<CmsTest>> {
        let url = self.endpoint("testes", &[("parte", part_id.to_string())])?;
        self.get_json("tests", url).await
    }

    async fn lesson_by_id(&self, lesson_id: i64) -> Result<CmsLesson> {
        let url = self.endpoint(&format!("licoes/{}", lesson_id), &[])?;
        self.get_json("lesson", url).await
    }

    async fn part_by_id(&self, part_id: i64) -> Result<CmsPart> {
        let url = self.endpoint(&format!("partes/{}", part_id), &[])?;
        self.get_json("part", url).await
    }

    async fn test_by_id(&self, test_id: i64) -> Result<CmsTest> {
        let url = self.endpoint(&format!("testes/{}", test_id), &[])?;
        self.get_json("test", url).await
    }

    async fn courses_by_ids(&self, course_ids: &[i64]) -> Result<Vec<CmsCourse>> {
        let query: Vec<(&str, String)> = course_ids.iter().map(|id| ("id", id.to_string())).collect();
        let url = self.endpoint("cursos", &query)?;
        self.get_json("courses", url).await
    }
}

#[derive(Default)]
struct GraphData {
    courses: HashMap<i64, CmsCourse>,
    lessons: HashMap<i64, (i64, CmsLesson)>,
    parts: HashMap<i64, (i64, CmsPart)>,
    tests: HashMap<i64, (i64, CmsTest)>,
    failing: bool,
    failing_endpoints: HashSet<&'static str>,
}

/// Content graph held in memory. Used by tests and local development.
#[derive(Clone, Default)]
pub struct InMemoryContentGraph {
    data: Arc<RwLock<GraphData>>,
}

impl InMemoryContentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_course(&self, course: CmsCourse) {
        if let Ok(mut data) = self.data.write() {
            data.courses.insert(course.id, course);
        }
    }

    /// Registers a lesson. Its `partes` list is rebuilt from parts added later.
    pub fn add_lesson(&self, course_id: i64, lesson: CmsLesson) {
        if let Ok(mut data) = self.data.write() {
            data.lessons.insert(lesson.id, (course_id, lesson));
        }
    }

    pub fn add_part(&self, lesson_id: i64, part: CmsPart) {
        if let Ok(mut data) = self.data.write() {
            if let Some((_, lesson)) = data.lessons.get_mut(&lesson_id) {
                lesson.partes.push(PartRef {
                    id: part.id,
                    ordem: part.ordem,
                });
            }
            data.parts.insert(part.id, (lesson_id, part));
        }
    }

    pub fn add_test(&self, part_id: i64, test: CmsTest) {
        if let Ok(mut data) = self.data.write() {
            data.tests.insert(test.id, (part_id, test));
        }
    }

    /// Makes every subsequent call fail, as an unreachable CMS would.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut data) = self.data.write() {
            data.failing = failing;
        }
    }

    /// Makes only the named endpoint fail (`"lessons"`, `"parts"`, `"tests"`,
    /// `"lesson"`, `"part"`, `"test"` or `"courses"`).
    pub fn fail_endpoint(&self, endpoint: &'static str) {
        if let Ok(mut data) = self.data.write() {
            data.failing_endpoints.insert(endpoint);
        }
    }

    fn read<T>(
        &self,
        endpoint: &'static str,
        f: impl FnOnce(&GraphData) -> Result<T>,
    ) -> Result<T> {
        let data = self
            .data
            .read()
            .map_err(|e| anyhow!("content graph lock poisoned: {}", e))?;
        if data.failing || data.failing_endpoints.contains(endpoint) {
            return Err(anyhow!("CMS unavailable: {}", endpoint));
        }
        f(&data)
    }
}

fn children<T: Clone>(nodes: &HashMap<i64, (i64, T)>, parent_id: i64) -> Vec<T> {
    let mut ids: Vec<&i64> = nodes
        .iter()
        .filter(|(_, (parent, _))| *parent == parent_id)
        .map(|(id, _)| id)
        .collect();
    ids.sort();
    ids.into_iter()
        .filter_map(|id| nodes.get(id).map(|(_, node)| node.clone()))
        .collect()
}

#[async_trait]
impl ContentGraph for InMemoryContentGraph {
    async fn lessons_by_course(&self, course_id: i64) -> Result<Vec<CmsLesson>> {
        self.read("lessons", |data| Ok(children(&data.lessons, course_id)))
    }

    async fn parts_by_lesson(&self, lesson_id: i64) -> Result<Vec<CmsPart>> {
        self.read("parts", |data| Ok(children(&data.parts, lesson_id)))
    }

    async fn tests_by_part(&self, part_id: i64) -> Result<Vec<CmsTest>> {
        self.read("tests", |data| Ok(children(&data.tests, part_id)))
    }

    async fn lesson_by_id(&self, lesson_id: i64) -> Result<CmsLesson> {
        self.read("lesson", |data| {
            data.lessons
                .get(&lesson_id)
                .map(|(_, lesson)| lesson.clone())
                .ok_or_else(|| anyhow!("Lesson {} not found", lesson_id))
        })
    }

    async fn part_by_id(&self, part_id: i64) -> Result<CmsPart> {
        self.read("part", |data| {
            data.parts
                .get(&part_id)
                .map(|(_, part)| part.clone())
                .ok_or_else(|| anyhow!("Part {} not found", part_id))
        })
    }

    async fn test_by_id(&self, test_id: i64) -> Result<CmsTest> {
        self.read("test", |data| {
            data.tests
                .get(&test_id)
                .map(|(_, test)| test.clone())
                .ok_or_else(|| anyhow!("Test {} not found", test_id))
        })
    }

    async fn courses_by_ids(&self, course_ids: &[i64]) -> Result<Vec<CmsCourse>> {
        self.read("courses", |data| {
            Ok(course_ids
                .iter()
                .filter_map(|id| data.courses.get(id).cloned())
                .collect())
        })
    }
}
