//! Cache keys for HPInet reads.
//!
//! Each key folds the endpoint and every request parameter into its hash.
//! String parameters are written with `{:?}` so embedded separators cannot make
//! two different requests collide.

use crate::cache::{hash_key, QueryKey};

use super::types::{
  AnnotationQuery, DomainQuery, NetworkQuery, ProteinPair, ResultsQuery, SequencePair,
  SpeciesPair,
};

impl QueryKey for ResultsQuery {
  fn cache_hash(&self) -> String {
    hash_key(&format!(
      "results:{:?}:{:?}:{}:{}:{:?}",
      self.result_id,
      self.category,
      self.page,
      self.size,
      self.filter.as_deref().map(normalize_filter).unwrap_or_default()
    ))
  }

  fn description(&self) -> String {
    match self.filter.as_deref().map(str::trim) {
      Some(q) if !q.is_empty() => format!(
        "{} result {} page {} matching {}",
        self.category, self.result_id, self.page, q
      ),
      _ => format!("{} result {} page {}", self.category, self.result_id, self.page),
    }
  }
}

impl QueryKey for NetworkQuery {
  fn cache_hash(&self) -> String {
    hash_key(&format!(
      "network:{:?}:{:?}:{}:{}:{:?}",
      self.result_id, self.category, self.limit, self.offset, self.sort
    ))
  }

  fn description(&self) -> String {
    format!(
      "network for {} result {} (offset {}, limit {})",
      self.category, self.result_id, self.offset, self.limit
    )
  }
}

impl QueryKey for DomainQuery {
  fn cache_hash(&self) -> String {
    hash_key(&format!(
      "domain_results:{:?}:{}:{}:{:?}:{:?}:{:?}:{:?}:{:?}:{:?}",
      self.species,
      self.page,
      self.size,
      self.genes,
      self.idt,
      self.intdb,
      self.keyword.trim(),
      self.search_type,
      normalize_filter(&self.q)
    ))
  }

  fn description(&self) -> String {
    if self.search_type == "keyword" {
      format!("interactome {} keyword {}", self.species, self.keyword.trim())
    } else {
      format!("interactome {} ({} genes)", self.species, self.genes.len())
    }
  }
}

impl QueryKey for AnnotationQuery {
  fn cache_hash(&self) -> String {
    // Kinds without sptype share one entry per species
    let sptype = if self.kind.uses_sptype {
      self.sptype.as_str()
    } else {
      ""
    };
    hash_key(&format!(
      "annotations:{}:{:?}:{:?}:{}:{}",
      self.kind.name, self.species, sptype, self.page, self.size
    ))
  }

  fn description(&self) -> String {
    format!("{} for {} page {}", self.kind.title, self.species, self.page)
  }
}

impl QueryKey for SpeciesPair {
  fn cache_hash(&self) -> String {
    hash_key(&format!("species_pair:{:?}:{:?}", self.host, self.pathogen))
  }

  fn description(&self) -> String {
    format!("{} x {}", self.host, self.pathogen)
  }
}

impl QueryKey for ProteinPair {
  fn cache_hash(&self) -> String {
    hash_key(&format!(
      "protein_pair:{:?}:{:?}:{:?}:{:?}",
      self.host, self.hid, self.pathogen, self.pid
    ))
  }

  fn description(&self) -> String {
    format!("{} ({}) x {} ({})", self.hid, self.host, self.pid, self.pathogen)
  }
}

impl QueryKey for SequencePair {
  fn cache_hash(&self) -> String {
    let pair = self.pair();
    hash_key(&format!(
      "sequence_pair:{:?}:{:?}:{:?}:{:?}",
      pair.host, pair.hid, pair.pathogen, pair.pid
    ))
  }

  fn description(&self) -> String {
    format!("sequences of {}", self.pair().description())
  }
}

/// Trim free-text filters so incidental whitespace shares a cache entry.
fn normalize_filter(q: &str) -> String {
  q.trim().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::annotations::find;

  #[test]
  fn test_filter_whitespace_shares_key() {
    let mut a = ResultsQuery::new("hpinet-1", "interolog");
    a.filter = Some("  kinase ".to_string());
    let mut b = a.clone();
    b.filter = Some("kinase".to_string());
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_every_parameter_is_part_of_the_key() {
    let base = ResultsQuery::new("hpinet-1", "interolog");
    let mut page = base.clone();
    page.page = 1;
    let mut size = base.clone();
    size.size = 50;
    let mut category = base.clone();
    category.category = "domain".to_string();

    let hashes = [
      base.cache_hash(),
      page.cache_hash(),
      size.cache_hash(),
      category.cache_hash(),
    ];
    for (i, a) in hashes.iter().enumerate() {
      for b in &hashes[i + 1..] {
        assert_ne!(a, b);
      }
    }
  }

  #[test]
  fn test_separators_cannot_collide() {
    let a = SpeciesPair {
      host: "wheat:x".to_string(),
      pathogen: "y".to_string(),
    };
    let b = SpeciesPair {
      host: "wheat".to_string(),
      pathogen: "x:y".to_string(),
    };
    assert_ne!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_sptype_ignored_for_virulence() {
    let Some(virulence) = find("virulence") else {
      panic!("virulence kind missing");
    };
    let host = AnnotationQuery::new(virulence, "puccinia_triticina");
    let mut pathogen = host.clone();
    pathogen.sptype = "pathogen".to_string();
    assert_eq!(host.cache_hash(), pathogen.cache_hash());

    let Some(go) = find("go") else {
      panic!("go kind missing");
    };
    let host = AnnotationQuery::new(go, "triticum_aestivum");
    let mut pathogen = host.clone();
    pathogen.sptype = "pathogen".to_string();
    assert_ne!(host.cache_hash(), pathogen.cache_hash());
  }

  #[test]
  fn test_description_is_readable() {
    let query = DomainQuery::new("wheat", "puccinia");
    assert_eq!(query.description(), "interactome wheat_puccinia (0 genes)");
  }

  fn pair(host: &str, pathogen: &str) -> ProteinPair {
    ProteinPair {
      host: host.to_string(),
      pathogen: pathogen.to_string(),
      hid: "TraesCS1A02G000100".to_string(),
      pid: "Ti_1".to_string(),
    }
  }

  #[test]
  fn test_sequence_species_case_shares_key() {
    let upper = SequencePair::new(pair("Wheat", "Tindica"));
    let lower = SequencePair::new(pair("wheat", "tindica"));
    assert_eq!(upper, lower);
    assert_eq!(upper.cache_hash(), lower.cache_hash());

    // Bundles are requested with the species as given.
    assert_ne!(pair("Wheat", "Tindica").cache_hash(), pair("wheat", "tindica").cache_hash());
    assert_ne!(lower.cache_hash(), pair("wheat", "tindica").cache_hash());
  }
}
