use serde::{Deserialize, Serialize};

/// Kind of node in a career knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Person,
    Skill,
    Experience,
    Education,
    Company,
    Certification,
    Project,
    Technology,
    #[serde(other)]
    Unknown,
}

impl NodeType {
    pub fn color(&self) -> &'static str {
        match self {
            NodeType::Person => "#8b5cf6",
            NodeType::Skill => "#3b82f6",
            NodeType::Experience => "#10b981",
            NodeType::Education => "#f97316",
            NodeType::Certification => "#eab308",
            NodeType::Project => "#ec4899",
            NodeType::Company => "#6366f1",
            NodeType::Technology => "#14b8a6",
            NodeType::Unknown => LINK_COLOR,
        }
    }

    /// Plural heading used when grouping nodes.
    pub fn label(&self) -> &'static str {
        match self {
            NodeType::Person => "Person",
            NodeType::Skill => "Skills",
            NodeType::Experience => "Experience",
            NodeType::Education => "Education",
            NodeType::Certification => "Certifications",
            NodeType::Project => "Projects",
            NodeType::Company => "Companies",
            NodeType::Technology => "Technologies",
            NodeType::Unknown => "Other",
        }
    }
}

pub const LINK_COLOR: &str = "#475569";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl SkillLevel {
    pub fn percentage(&self) -> u8 {
        match self {
            SkillLevel::Beginner => 25,
            SkillLevel::Intermediate => 50,
            SkillLevel::Advanced => 75,
            SkillLevel::Expert => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    HasSkill,
    WorkedAt,
    StudiedAt,
    CertifiedBy,
    CompletedProject,
    UsesTechnology,
    RelatedTo,
    AtCompany,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub description: Option<String>,
    pub level: Option<SkillLevel>,
    pub years: Option<f64>,
    pub institution: Option<String>,
    pub date: Option<String>,
    pub relevance_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: u64,
    #[serde(default)]
    pub labels: Vec<String>,
    pub color: String,
    #[serde(default = "visible")]
    pub visible: bool,
    pub data: NodeData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkData {
    pub label: Option<String>,
    pub weight: Option<f64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub id: u64,
    pub relationship: RelationshipType,
    pub color: String,
    pub source: u64,
    pub target: u64,
    #[serde(default = "visible")]
    pub visible: bool,
    #[serde(default)]
    pub data: LinkData,
}

/// A document-level or user-level knowledge graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub links: Vec<GraphLink>,
}

impl GraphData {
    pub fn node(&self, id: u64) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &GraphNode> {
        self.nodes
            .iter()
            .filter(move |n| n.data.node_type == node_type)
    }

    /// Links whose endpoints are both present in `nodes`.
    pub fn connected_links(&self) -> impl Iterator<Item = &GraphLink> {
        self.links
            .iter()
            .filter(|l| self.node(l.source).is_some() && self.node(l.target).is_some())
    }
}

fn visible() -> bool {
    true
}
