//! Page fingerprints, duplicate lookup and category classification.
//!
//! The [`Recognizer`] owns the signature catalogue of one session. The
//! explorer asks it two questions about every capture: does this screen need
//! a human ([`detect_assistance`]), and has it been seen before
//! ([`Recognizer::find_duplicate`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::page::{compute_bytes_hash, compute_content_hash, Page, PageId};

/// Similarity at or above which two signatures describe the same page.
pub const DUPLICATE_THRESHOLD: f64 = 0.6;

/// Default confidence a category needs before it applies.
pub const DEFAULT_CATEGORY_THRESHOLD: f64 = 0.7;

/// Maximum number of pages returned by [`Recognizer::find_similar`].
pub const MAX_SIMILAR: usize = 5;

const TITLE_WEIGHT: f64 = 0.3;
const ACTIVITY_WEIGHT: f64 = 0.3;
const ELEMENT_COUNT_WEIGHT: f64 = 0.2;
const SCREENSHOT_WEIGHT: f64 = 0.1;
const UI_HIERARCHY_WEIGHT: f64 = 0.1;

/// Comparable digest of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSignature {
    pub title_hash: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_hash: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_hierarchy_hash: Option<u64>,
    pub element_count: usize,
    pub activity_name: String,
}

impl PageSignature {
    pub fn new(
        title: &str,
        activity_name: &str,
        element_count: usize,
        screenshot: Option<&[u8]>,
        ui_hierarchy: Option<&str>,
    ) -> Self {
        Self {
            title_hash: compute_content_hash(title),
            screenshot_hash: screenshot.map(compute_bytes_hash),
            ui_hierarchy_hash: ui_hierarchy.map(compute_content_hash),
            element_count,
            activity_name: activity_name.to_string(),
        }
    }

    /// Weighted similarity in `[0, 1]`.
    ///
    /// Components that cannot be computed for this pair (missing hash, empty
    /// activity, zero elements) are left out of both the matched and the
    /// total weight.
    pub fn similarity(&self, other: &PageSignature) -> f64 {
        let mut matched = 0.0;
        let mut total = TITLE_WEIGHT;
        if self.title_hash == other.title_hash {
            matched += TITLE_WEIGHT;
        }

        if !self.activity_name.is_empty() && !other.activity_name.is_empty() {
            total += ACTIVITY_WEIGHT;
            if self.activity_name == other.activity_name {
                matched += ACTIVITY_WEIGHT;
            }
        }

        if self.element_count > 0 && other.element_count > 0 {
            total += ELEMENT_COUNT_WEIGHT;
            let (lo, hi) = if self.element_count <= other.element_count {
                (self.element_count, other.element_count)
            } else {
                (other.element_count, self.element_count)
            };
            matched += ELEMENT_COUNT_WEIGHT * (lo as f64 / hi as f64);
        }

        if let (Some(a), Some(b)) = (self.screenshot_hash, other.screenshot_hash) {
            total += SCREENSHOT_WEIGHT;
            if a == b {
                matched += SCREENSHOT_WEIGHT;
            }
        }

        if let (Some(a), Some(b)) = (self.ui_hierarchy_hash, other.ui_hierarchy_hash) {
            total += UI_HIERARCHY_WEIGHT;
            if a == b {
                matched += UI_HIERARCHY_WEIGHT;
            }
        }

        (matched / total).clamp(0.0, 1.0)
    }
}

/// Keyword rule for one page category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub threshold: f64,
}

impl CategoryRule {
    pub fn new(id: &str, name: &str, keywords: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            threshold: DEFAULT_CATEGORY_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Confidence that `text` belongs to this category.
    ///
    /// Keyword coverage scaled by how much text there is to judge from; short
    /// texts are penalized up to 100 characters.
    pub fn confidence(&self, text: &str) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let lower = text.to_lowercase();
        let matched = self.keywords.iter().filter(|k| lower.contains(k.as_str())).count();
        let keyword_score = matched as f64 / self.keywords.len() as f64;
        let length_factor = (text.chars().count() as f64 / 100.0).min(1.0);
        keyword_score * length_factor
    }
}

/// Built-in categories.
pub fn default_categories() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new(
            "login",
            "Login",
            &["登录", "登陆", "sign in", "login", "用户名", "密码", "验证码"],
        ),
        CategoryRule::new("main", "Main", &["首页", "主页", "main", "home", "dashboard", "欢迎"]),
        CategoryRule::new(
            "settings",
            "Settings",
            &["设置", "配置", "settings", "preferences", "选项", "个人中心"],
        ),
        CategoryRule::new(
            "list",
            "List",
            &["列表", "清单", "list", "items", "商品", "产品", "文章"],
        ),
        CategoryRule::new("detail", "Detail", &["详情", "详细", "detail", "信息", "内容", "描述"]),
        CategoryRule::new(
            "form",
            "Form",
            &["表单", "填写", "form", "输入", "提交", "注册", "申请"],
        ),
        CategoryRule::new("search", "Search", &["搜索", "查找", "search", "查询", "筛选", "过滤"]),
        CategoryRule::new("profile", "Profile", &["个人", "资料", "profile", "账户", "信息", "头像"]),
        CategoryRule::new("payment", "Payment", &["支付", "付款", "payment", "结算", "订单", "金额"]),
        CategoryRule::new(
            "notification",
            "Notification",
            &["通知", "消息", "notification", "提醒", "公告", "动态"],
        ),
    ]
}

/// Classification result for one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    /// Categories whose confidence met their threshold, best first.
    pub categories: Vec<String>,
    pub primary: Option<String>,
    /// Confidence of every rule, applied or not.
    pub confidence_scores: BTreeMap<String, f64>,
}

/// Text the category rules are matched against.
pub fn classification_text(page: &Page) -> String {
    let mut parts: Vec<&str> = vec![page.title.as_str(), page.activity_name.as_str()];
    for element in &page.elements {
        if let Some(text) = element.text() {
            parts.push(text);
        }
        if let Some(desc) = element.content_desc() {
            parts.push(desc);
        }
    }
    parts.join(" ")
}

/// Why a screen cannot be passed without help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Fingerprint,
    FaceRecognition,
    Captcha,
    Hardware,
}

impl BlockReason {
    pub fn reason(&self) -> &'static str {
        match self {
            BlockReason::Fingerprint => "fingerprint authentication",
            BlockReason::FaceRecognition => "face recognition",
            BlockReason::Captcha => "verification code",
            BlockReason::Hardware => "hardware interaction",
        }
    }

    /// What the operator is asked to do.
    pub fn expected_action(&self) -> &'static str {
        match self {
            BlockReason::Fingerprint => "Complete the fingerprint check on the device",
            BlockReason::FaceRecognition => "Complete the face check on the device",
            BlockReason::Captcha => "Enter the verification code on the device",
            BlockReason::Hardware => "Perform the NFC, QR or Bluetooth step on the device",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            BlockReason::Fingerprint => &["指纹", "指纹登录", "指纹验证", "fingerprint", "touch id"],
            BlockReason::FaceRecognition => &["人脸", "面部", "刷脸", "face", "facial"],
            BlockReason::Captcha => &["验证码", "captcha", "验证", "code"],
            BlockReason::Hardware => &["nfc", "扫码", "二维码", "蓝牙", "qr", "scan"],
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Keyword check for screens that need a human.
///
/// Both inputs are lowercased before matching. Reasons are tried in a fixed
/// order and the first hit wins.
pub fn detect_assistance(title: &str, ui_hierarchy: &str) -> Option<BlockReason> {
    let title = title.to_lowercase();
    let tree = ui_hierarchy.to_lowercase();
    [
        BlockReason::Fingerprint,
        BlockReason::FaceRecognition,
        BlockReason::Captcha,
        BlockReason::Hardware,
    ]
    .into_iter()
    .find(|reason| {
        reason
            .keywords()
            .iter()
            .any(|k| title.contains(k) || tree.contains(k))
    })
}

/// Returned when registering a category id that already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateCategory(pub String);

impl std::fmt::Display for DuplicateCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "category '{}' already exists", self.0)
    }
}

impl std::error::Error for DuplicateCategory {}

/// Signature catalogue and category rules for one session.
#[derive(Debug, Clone)]
pub struct Recognizer {
    rules: Vec<CategoryRule>,
    signatures: Vec<(PageId, PageSignature)>,
}

impl Default for Recognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Recognizer {
    pub fn new() -> Self {
        Self {
            rules: default_categories(),
            signatures: Vec::new(),
        }
    }

    pub fn categories(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn add_custom_category(&mut self, rule: CategoryRule) -> Result<(), DuplicateCategory> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(DuplicateCategory(rule.id));
        }
        debug!(category = %rule.id, keywords = rule.keywords.len(), "Registered custom category");
        self.rules.push(rule);
        Ok(())
    }

    /// Add a catalogued page's signature. Re-registering an id replaces it.
    pub fn register(&mut self, id: PageId, signature: PageSignature) {
        if let Some(slot) = self.signatures.iter_mut().find(|(existing, _)| *existing == id) {
            slot.1 = signature;
        } else {
            self.signatures.push((id, signature));
        }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Best catalogued page with similarity at or above the duplicate threshold.
    ///
    /// Ties go to the page registered first.
    pub fn find_duplicate(&self, signature: &PageSignature) -> Option<(PageId, f64)> {
        let mut best: Option<(&PageId, f64)> = None;
        for (id, known) in &self.signatures {
            let score = signature.similarity(known);
            if score < DUPLICATE_THRESHOLD {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((id, score));
            }
        }
        best.map(|(id, score)| (id.clone(), score))
    }

    /// Up to five catalogued pages strictly above the duplicate threshold, best first.
    pub fn find_similar(&self, signature: &PageSignature) -> Vec<(PageId, f64)> {
        let mut hits: Vec<(PageId, f64)> = self
            .signatures
            .iter()
            .map(|(id, known)| (id.clone(), signature.similarity(known)))
            .filter(|(_, score)| *score > DUPLICATE_THRESHOLD)
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1));
        hits.truncate(MAX_SIMILAR);
        hits
    }

    /// Score `page` against every category rule.
    pub fn classify(&self, page: &Page) -> Recognition {
        let text = classification_text(page);
        let mut confidence_scores = BTreeMap::new();
        let mut applied: Vec<(&str, f64)> = Vec::new();

        for rule in &self.rules {
            let confidence = rule.confidence(&text);
            confidence_scores.insert(rule.id.clone(), confidence);
            if confidence >= rule.threshold {
                applied.push((rule.id.as_str(), confidence));
            }
        }
        applied.sort_by(|a, b| b.1.total_cmp(&a.1));

        let categories: Vec<String> = applied.iter().map(|(id, _)| id.to_string()).collect();
        Recognition {
            primary: categories.first().cloned(),
            categories,
            confidence_scores,
        }
    }
}
