//! Concept graph over corpus chunks, walked from the query's nearest nodes

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use async_trait::async_trait;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::domain::{
    DomainError, Hit, MemoArena, RetrievedUnit, Strategy, StrategyConfig, StrategyKind,
    TraceRecorder, cosine_similarity,
};
use crate::infrastructure::rag::context::{
    DEFAULT_CORPUS_LIMIT, StrategyDeps, ask, extract_json, generate_grounded_answer, load_corpus,
    system_prompt_from,
};
use crate::infrastructure::text::truncate_chars;

const CONCEPT_SYSTEM_PROMPT: &str = "Extract the key concepts and entities from the text. Return \
the 5 to 10 most important keywords, entities or concepts as JSON: {\"concepts\": [\"concept\", \
...]}";

const MAX_CONCEPTS: usize = 10;
const MIN_CONCEPT_TEXT_CHARS: usize = 50;
const CONCEPT_INPUT_CHARS: usize = 1000;
const EMBED_INPUT_CHARS: usize = 500;
const FALLBACK_CONCEPTS: usize = 5;

#[derive(Debug, Deserialize)]
struct ConceptReply {
    #[serde(default)]
    concepts: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub hit: Hit,
    pub concepts: Vec<String>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub weight: f32,
    pub shared_concepts: Vec<String>,
}

/// Weights deciding when two chunks are linked
#[derive(Debug, Clone, Copy)]
pub struct EdgeWeights {
    pub semantic: f32,
    pub concept: f32,
    pub threshold: f32,
}

#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    pub graph: UnGraph<GraphNode, GraphEdge>,
}

impl KnowledgeGraph {
    /// Links nodes sharing at least one concept whose blended weight clears the threshold
    pub fn build(nodes: Vec<GraphNode>, weights: EdgeWeights) -> Self {
        let mut graph = UnGraph::with_capacity(nodes.len(), 0);
        let indices: Vec<NodeIndex> = nodes.into_iter().map(|n| graph.add_node(n)).collect();

        for (pos, &a) in indices.iter().enumerate() {
            for &b in &indices[pos + 1..] {
                let (left, right) = (&graph[a], &graph[b]);
                let left_concepts: HashSet<&str> =
                    left.concepts.iter().map(String::as_str).collect();
                let right_concepts: HashSet<&str> =
                    right.concepts.iter().map(String::as_str).collect();

                let mut shared: Vec<String> = left_concepts
                    .intersection(&right_concepts)
                    .map(|c| c.to_string())
                    .collect();
                if shared.is_empty() {
                    continue;
                }
                shared.sort();

                let similarity = cosine_similarity(&left.embedding, &right.embedding);
                let overlap =
                    shared.len() as f32 / left_concepts.len().min(right_concepts.len()) as f32;
                let weight = weights.semantic * similarity + weights.concept * overlap;

                if weight > weights.threshold {
                    graph.add_edge(
                        a,
                        b,
                        GraphEdge {
                            weight,
                            shared_concepts: shared,
                        },
                    );
                }
            }
        }

        Self { graph }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

/// One node reached by [`traverse`]
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub node: NodeIndex,
    pub score: f32,
    pub depth: usize,
    pub connected_concepts: Vec<String>,
}

#[derive(Debug)]
struct Frontier {
    score: f32,
    depth: usize,
    node: NodeIndex,
    path: Vec<String>,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // Max-heap on score; ties pop the shallower, then lower-numbered node
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Best-first expansion from `seeds`; a neighbour inherits `score * edge weight`
pub fn traverse(
    graph: &KnowledgeGraph,
    seeds: &[(NodeIndex, f32)],
    max_depth: usize,
    max_results: usize,
) -> Vec<Visit> {
    let mut queue: BinaryHeap<Frontier> = seeds
        .iter()
        .map(|&(node, score)| Frontier {
            score,
            depth: 0,
            node,
            path: Vec::new(),
        })
        .collect();
    let mut visited = HashSet::new();
    let mut results = Vec::new();

    while results.len() < max_results {
        let Some(current) = queue.pop() else {
            break;
        };
        if !visited.insert(current.node) {
            continue;
        }

        if current.depth < max_depth {
            for edge in graph.graph.edges(current.node) {
                let neighbour = if edge.source() == current.node {
                    edge.target()
                } else {
                    edge.source()
                };
                if visited.contains(&neighbour) {
                    continue;
                }
                let mut path = current.path.clone();
                path.extend(edge.weight().shared_concepts.iter().cloned());
                queue.push(Frontier {
                    score: current.score * edge.weight().weight,
                    depth: current.depth + 1,
                    node: neighbour,
                    path,
                });
            }
        }

        results.push(Visit {
            node: current.node,
            score: current.score,
            depth: current.depth,
            connected_concepts: current.path,
        });
    }

    results
}

#[derive(Debug)]
pub struct GraphStrategy {
    deps: StrategyDeps,
    system_prompt: String,
    max_nodes: usize,
    max_depth: usize,
    weights: EdgeWeights,
    corpus_limit: usize,
    concepts: MemoArena<String, Vec<String>>,
    graph: OnceCell<KnowledgeGraph>,
}

impl GraphStrategy {
    pub fn new(deps: StrategyDeps, config: &StrategyConfig) -> Self {
        Self {
            deps,
            system_prompt: system_prompt_from(config),
            max_nodes: config.usize_or("maxNodes", 20),
            max_depth: config.usize_or("maxDepth", 3),
            weights: EdgeWeights {
                semantic: config.f32_or("semanticWeight", 0.7),
                concept: config.f32_or("conceptWeight", 0.3),
                threshold: config.f32_or("edgeThreshold", 0.6),
            },
            corpus_limit: config.usize_or("corpusLimit", DEFAULT_CORPUS_LIMIT),
            concepts: MemoArena::new(),
            graph: OnceCell::new(),
        }
    }

    async fn extract_concepts(&self, hit: &Hit) -> Vec<String> {
        if let Some(cached) = self.concepts.get(&hit.id) {
            return cached;
        }
        if hit.content.trim().chars().count() < MIN_CONCEPT_TEXT_CHARS {
            return Vec::new();
        }

        let user = format!(
            "Extract the key concepts from this text:\n\n{}",
            truncate_chars(&hit.content, CONCEPT_INPUT_CHARS)
        );
        let reply = ask(self.deps.llm.as_ref(), CONCEPT_SYSTEM_PROMPT, &user, 0.0, 300).await;

        let parsed = reply.ok().and_then(|text| {
            extract_json(&text)
                .and_then(|json| serde_json::from_str::<ConceptReply>(json).ok())
                .map(|r| r.concepts)
        });

        match parsed {
            Some(mut concepts) => {
                concepts.truncate(MAX_CONCEPTS);
                self.concepts.insert(hit.id.clone(), concepts.clone());
                concepts
            }
            None => {
                warn!("Concept extraction failed for {}, using long words", hit.id);
                truncate_chars(&hit.content, EMBED_INPUT_CHARS)
                    .split_whitespace()
                    .filter(|w| w.chars().count() > 3)
                    .take(FALLBACK_CONCEPTS)
                    .map(str::to_string)
                    .collect()
            }
        }
    }

    async fn build_graph(&self, trace: &TraceRecorder) -> Result<KnowledgeGraph, DomainError> {
        let mut corpus = load_corpus(self.deps.search.as_ref(), self.corpus_limit).await?;
        corpus.truncate(self.max_nodes);

        let texts: Vec<String> = corpus
            .iter()
            .map(|h| truncate_chars(&h.content, EMBED_INPUT_CHARS).to_string())
            .collect();
        let embeddings = if texts.is_empty() {
            Vec::new()
        } else {
            self.deps.embedder.embed(&texts).await?
        };

        let mut nodes = Vec::with_capacity(corpus.len());
        for (hit, embedding) in corpus.into_iter().zip(embeddings) {
            let concepts = self.extract_concepts(&hit).await;
            nodes.push(GraphNode {
                hit,
                concepts,
                embedding,
            });
        }

        let graph = KnowledgeGraph::build(nodes, self.weights);
        info!(
            "Built knowledge graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        trace.log_details(
            "graph_built",
            "Built knowledge graph",
            json!({ "nodes": graph.node_count(), "edges": graph.edge_count() }),
        );

        Ok(graph)
    }
}

#[async_trait]
impl Strategy for GraphStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Graph
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        trace: &TraceRecorder,
    ) -> Result<Vec<RetrievedUnit>, DomainError> {
        let graph = self
            .graph
            .get_or_try_init(|| self.build_graph(trace))
            .await?;
        if graph.node_count() == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.deps.embedder.embed_one(query).await?;
        let mut seeds: Vec<(NodeIndex, f32)> = graph
            .graph
            .node_indices()
            .map(|i| (i, cosine_similarity(&query_vector, &graph.graph[i].embedding)))
            .collect();
        seeds.sort_by(|a, b| b.1.total_cmp(&a.1));
        seeds.truncate(top_k);
        debug!("Graph traversal seeds: {:?}", seeds);

        let visits = traverse(graph, &seeds, self.max_depth, top_k * 3);
        trace.log_details(
            "graph_traversed",
            format!("Traversal reached {} nodes", visits.len()),
            json!({
                "visited": visits.len(),
                "maxDepthReached": visits.iter().map(|v| v.depth).max().unwrap_or(0),
            }),
        );

        Ok(visits
            .into_iter()
            .take(top_k)
            .map(|visit| {
                let node = &graph.graph[visit.node];
                RetrievedUnit::from(node.hit.clone().with_score(visit.score))
                    .with_metadata("concepts", node.concepts.clone())
                    .with_metadata("traversalDepth", visit.depth)
                    .with_metadata("connectedConcepts", visit.connected_concepts)
            })
            .collect())
    }

    async fn generate(
        &self,
        query: &str,
        units: &[RetrievedUnit],
        trace: &TraceRecorder,
    ) -> Result<String, DomainError> {
        generate_grounded_answer(self.deps.llm.as_ref(), query, units, &self.system_prompt, trace)
            .await
    }
}
