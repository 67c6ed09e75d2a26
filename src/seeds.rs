//! Built-in default content: fallback topic lists and the offline question
//! templates used when no external generator is configured.

/// Generic fallback topics, used for subjects without a dedicated list.
const GENERIC_TOPICS: &[&str] = &[
  "Core Definitions",
  "Fundamental Principles",
  "Worked Problems",
  "Real-World Applications",
  "Common Misconceptions",
  "Historical Development",
  "Analysis and Interpretation",
];

/// Built-in fallback topic list for a subject.
pub fn fallback_topics(subject: &str) -> Vec<String> {
  let list: &[&str] = match subject.trim().to_lowercase().as_str() {
    "physics" => &[
      "Kinematics", "Newton's Laws", "Work and Energy", "Momentum", "Thermodynamics",
      "Waves and Sound", "Optics", "Electricity", "Magnetism", "Modern Physics",
    ],
    "chemistry" => &[
      "Atomic Structure", "Periodic Table", "Chemical Bonding", "Stoichiometry",
      "Thermochemistry", "Reaction Kinetics", "Chemical Equilibrium", "Acids and Bases",
      "Redox Reactions", "Organic Chemistry",
    ],
    "biology" => &[
      "Cell Structure", "Genetics", "Evolution", "Ecology", "Human Physiology",
      "Plant Biology", "Microbiology", "Molecular Biology", "Biochemistry",
    ],
    "math" | "mathematics" => &[
      "Algebra", "Functions", "Geometry", "Trigonometry", "Probability", "Statistics",
      "Sequences and Series", "Calculus", "Linear Algebra",
    ],
    "history" => &[
      "Ancient Civilizations", "Medieval Period", "Renaissance", "Industrial Revolution",
      "World War I", "World War II", "Cold War", "Decolonization",
    ],
    _ => GENERIC_TOPICS,
  };
  list.iter().map(|s| s.to_string()).collect()
}

/// Question/answer templates for the offline generator. `{subject}`/`{topic}`/`{n}`
/// are filled at generation time.
pub const OFFLINE_TEMPLATES: &[(&str, &str)] = &[
  (
    "({n}) In {subject}, explain the central idea of {topic} in two or three sentences.",
    "A correct answer states the defining principle of {topic} and one consequence of it.",
  ),
  (
    "({n}) Give a concrete example where {topic} applies in {subject}, and justify it.",
    "Any example is acceptable if the justification ties it back to {topic}.",
  ),
  (
    "({n}) Name a common mistake students make with {topic} in {subject} and correct it.",
    "The answer identifies one misconception about {topic} and states the correct reasoning.",
  ),
];
