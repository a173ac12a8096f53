//! Prompt templates for parameter extraction.
//!
//! Every strategy shares [`BASE_INSTRUCTION`]: what counts as a parameter,
//! the five fields to report, and a YAML-list output format. The strategies
//! differ only in what surrounds the snippet (worked examples, reasoning
//! scaffolds).
//!
//! Bump `PROMPT_VERSION` whenever template text changes so report metadata
//! can be traced back to the prompt that produced it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prompt version. Bump on any template change.
pub const PROMPT_VERSION: &str = "1.0.0";

/// Words that usually mark a configurable or implementation-defined aspect.
pub const TRIGGER_WORDS: &[&str] = &[
    "may",
    "might",
    "should",
    "could",
    "optional",
    "optionally",
    "implementation defined",
    "implementation-defined",
    "implementation specific",
    "implementation-specific",
    "platform defined",
    "platform-specific",
];

pub const BASE_INSTRUCTION: &str = "\
You are an expert in RISC-V architecture. Your task is to extract architectural \
parameters from specification text.

A parameter is any aspect of the architecture that is:
- Implementation-defined or implementation-specific
- Optional or configurable
- Described with words like \"may\", \"might\", \"should\", \"could\"

For each parameter, provide:
1. **name**: A concise identifier (snake_case)
2. **description**: What the parameter controls
3. **type**: The category (e.g., \"implementation-specific\", \"optional\", \"configurable\")
4. **constraints**: Any mentioned limitations or requirements
5. **keywords**: Trigger words found in the text

Format your response as a valid YAML list.";

/// A specification excerpt paired with the YAML we want back for it.
#[derive(Debug, Clone, Copy)]
pub struct WorkedExample {
    pub text: &'static str,
    pub output: &'static str,
}

pub const WORKED_EXAMPLES: [WorkedExample; 3] = [
    WorkedExample {
        text: "\
The cache line size is implementation-defined. Systems may use cache lines
ranging from 32 to 128 bytes, and the size should be a power of two.",
        output: "\
- name: cache_line_size
  description: Size of a cache line in bytes
  type: implementation-defined
  constraints: Must be power of two, range 32-128 bytes
  keywords: [implementation-defined, may, should]",
    },
    WorkedExample {
        text: "\
The number of hardware performance counters is implementation-specific.
Implementations may provide between 2 and 29 counters.",
        output: "\
- name: hardware_performance_counter_count
  description: Number of hardware performance monitoring counters
  type: implementation-specific
  constraints: Range 2-29 counters
  keywords: [implementation-specific, may]",
    },
    WorkedExample {
        text: "\
Support for misaligned memory accesses is optional. If supported,
the implementation should handle them efficiently.",
        output: "\
- name: misaligned_memory_access_support
  description: Whether misaligned memory accesses are supported
  type: optional
  constraints: If supported, should be efficient
  keywords: [optional, should]",
    },
];

const CHAIN_OF_THOUGHT_SCAFFOLD: &str = "\
**Think step-by-step:**

1. First, identify all trigger words (may, might, should, optional, implementation-defined, etc.)
2. For each trigger word, determine what aspect it refers to
3. Extract the parameter name, description, and constraints
4. Verify each parameter is truly configurable or implementation-specific
5. Format the results as YAML

**Your reasoning and final YAML output:**";

const TREE_OF_THOUGHTS_SCAFFOLD: &str = "\
**Analyze using multiple perspectives:**

**Path 1 - Literal Reading:**
- What parameters are explicitly stated as optional or implementation-defined?

**Path 2 - Implicit Parameters:**
- What aspects are described but not explicitly marked as configurable?
- Are there ranges, choices, or alternatives mentioned?

**Path 3 - Constraint Analysis:**
- What constraints or requirements are mentioned?
- Do these constraints imply configurability?

**Synthesis:**
After exploring these paths, synthesize the findings into a comprehensive list of parameters.

**Final YAML output with all discovered parameters:**";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown strategy: {name}. Available: {}", PromptStrategy::names().join(", "))]
pub struct UnknownStrategy {
    pub name: String,
}

/// How the snippet is framed for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStrategy {
    ZeroShot,
    OneShot,
    FewShot,
    ChainOfThought,
    TreeOfThoughts,
}

impl PromptStrategy {
    pub const ALL: [PromptStrategy; 5] = [
        Self::ZeroShot,
        Self::OneShot,
        Self::FewShot,
        Self::ChainOfThought,
        Self::TreeOfThoughts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZeroShot => "zero_shot",
            Self::OneShot => "one_shot",
            Self::FewShot => "few_shot",
            Self::ChainOfThought => "chain_of_thought",
            Self::TreeOfThoughts => "tree_of_thoughts",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.as_str()).collect()
    }

    /// Render the full prompt for one snippet.
    pub fn build_prompt(&self, snippet: &str) -> String {
        match self {
            Self::ZeroShot => format!(
                "{BASE_INSTRUCTION}\n\n**Specification Text:**\n{snippet}\n\n\
                 **Extract all parameters in YAML format:**"
            ),
            Self::OneShot => {
                let example = &WORKED_EXAMPLES[0];
                format!(
                    "{BASE_INSTRUCTION}\n\n**Example:**\n\nInput Text:\n{}\n\nOutput:\n{}\n\n---\n\n\
                     **Now extract parameters from this specification text:**\n{snippet}\n\n\
                     **Output in YAML format:**",
                    example.text, example.output
                )
            }
            Self::FewShot => {
                let examples = WORKED_EXAMPLES
                    .iter()
                    .enumerate()
                    .map(|(i, ex)| {
                        format!(
                            "**Example {}:**\n\nInput Text:\n{}\n\nOutput:\n{}",
                            i + 1,
                            ex.text,
                            ex.output
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n---\n\n");
                format!(
                    "{BASE_INSTRUCTION}\n\n{examples}\n\n---\n\n\
                     **Now extract parameters from this specification text:**\n{snippet}\n\n\
                     **Output in YAML format:**"
                )
            }
            Self::ChainOfThought => format!(
                "{BASE_INSTRUCTION}\n\n**Specification Text:**\n{snippet}\n\n{CHAIN_OF_THOUGHT_SCAFFOLD}"
            ),
            Self::TreeOfThoughts => format!(
                "{BASE_INSTRUCTION}\n\n**Specification Text:**\n{snippet}\n\n{TREE_OF_THOUGHTS_SCAFFOLD}"
            ),
        }
    }
}

impl fmt::Display for PromptStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.trim())
            .ok_or_else(|| UnknownStrategy { name: s.to_string() })
    }
}
