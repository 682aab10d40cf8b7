//! Annotation categories and lookup by name or alias.

#[derive(Debug, PartialEq, Eq)]
pub struct Column {
  pub key: &'static str,
  pub header: &'static str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct AnnotationKind {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub title: &'static str,
  pub endpoint: &'static str,
  /// Whether the endpoint distinguishes host and pathogen species
  pub uses_sptype: bool,
  pub columns: &'static [Column],
}

const fn col(key: &'static str, header: &'static str) -> Column {
  Column { key, header }
}

/// All annotation categories served by the backend
pub const ANNOTATION_KINDS: &[AnnotationKind] = &[
  AnnotationKind {
    name: "go",
    aliases: &["gene-ontology", "ontology"],
    title: "Gene Ontology",
    endpoint: "/api/go/",
    uses_sptype: true,
    columns: &[
      col("gene", "Protein"),
      col("term", "GO ID"),
      col("description", "GO Term"),
      col("definition", "Definition"),
      col("evidence", "Evidence"),
      col("ontology", "Ontology"),
    ],
  },
  AnnotationKind {
    name: "kegg",
    aliases: &["pathway", "pathways"],
    title: "KEGG Pathways",
    endpoint: "/api/kegg/",
    uses_sptype: true,
    columns: &[
      col("gene", "Protein"),
      col("pathway", "KEGG ID"),
      col("description", "Pathway"),
    ],
  },
  AnnotationKind {
    name: "interpro",
    aliases: &["domain", "domains"],
    title: "InterPro Domains",
    endpoint: "/api/interpro/",
    uses_sptype: true,
    columns: &[
      col("gene", "Protein"),
      col("length", "Length"),
      col("interpro_id", "InterPro"),
      col("sourcedb", "Source DB"),
      col("domain", "Domain"),
      col("domain_description", "Description"),
      col("score", "Score"),
    ],
  },
  AnnotationKind {
    name: "local",
    aliases: &["localization", "subcellular"],
    title: "Subcellular Localization",
    endpoint: "/api/local/",
    uses_sptype: true,
    columns: &[col("gene", "Protein"), col("location", "Localization")],
  },
  AnnotationKind {
    name: "tf",
    aliases: &["transcription-factor", "tfs"],
    title: "Transcription Factors",
    endpoint: "/api/tf/",
    uses_sptype: true,
    columns: &[col("gene", "Protein"), col("tf_family", "TF Family")],
  },
  AnnotationKind {
    name: "virulence",
    aliases: &["effector", "effectors"],
    title: "Virulence / Effector Proteins",
    endpoint: "/api/effector/",
    uses_sptype: false,
    columns: &[col("gene", "Protein"), col("type", "Type")],
  },
];

/// Rank annotation kinds against user input, best match first.
pub fn get_suggestions(input: &str) -> Vec<&'static AnnotationKind> {
  let input_lower = input.trim().to_lowercase();

  if input_lower.is_empty() {
    return ANNOTATION_KINDS.iter().collect();
  }

  let mut matches: Vec<(&AnnotationKind, u32)> = Vec::new();

  for kind in ANNOTATION_KINDS {
    let priority = if kind.name == input_lower {
      0
    } else if kind.aliases.contains(&input_lower.as_str()) {
      1
    } else if kind.name.starts_with(&input_lower) {
      2
    } else if kind.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      3
    } else if kind.name.contains(&input_lower) {
      4
    } else if kind.aliases.iter().any(|a| a.contains(&input_lower)) {
      5
    } else {
      continue;
    };
    matches.push((kind, priority));
  }

  // Stable sort keeps registry order within a priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(kind, _)| kind).collect()
}

/// Resolve input to a single kind: an exact name or alias, or an unambiguous
/// prefix.
pub fn find(input: &str) -> Option<&'static AnnotationKind> {
  let input_lower = input.trim().to_lowercase();
  if let Some(kind) = ANNOTATION_KINDS
    .iter()
    .find(|k| k.name == input_lower || k.aliases.contains(&input_lower.as_str()))
  {
    return Some(kind);
  }

  let mut prefixed = ANNOTATION_KINDS.iter().filter(|k| {
    !input_lower.is_empty()
      && (k.name.starts_with(&input_lower)
        || k.aliases.iter().any(|a| a.starts_with(&input_lower)))
  });
  match (prefixed.next(), prefixed.next()) {
    (Some(kind), None) => Some(kind),
    _ => None,
  }
}
