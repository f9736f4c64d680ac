use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

pub const ANNOTATION_INJECT: &str = "adjust-tz.k8s.example.io/inject";
pub const ANNOTATION_STATUS: &str = "adjust-tz.k8s.example.io/status";

/// Closed set of annotation values the webhook recognizes, matched case-insensitively.
pub trait Token: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|token| token.as_str().eq_ignore_ascii_case(value))
    }
}

/// Value of [`ANNOTATION_STATUS`] once a pod has been mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusToken {
    Injected,
}

impl Token for StatusToken {
    const ALL: &'static [Self] = &[Self::Injected];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Injected => "injected",
        }
    }
}

/// Values of [`ANNOTATION_INJECT`] that opt a pod out of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptOutToken {
    N,
    No,
    False,
    Off,
}

impl Token for OptOutToken {
    const ALL: &'static [Self] = &[Self::N, Self::No, Self::False, Self::Off];

    fn as_str(&self) -> &'static str {
        match self {
            Self::N => "n",
            Self::No => "no",
            Self::False => "false",
            Self::Off => "off",
        }
    }
}

pub fn is_mutation_required(
    ignored_namespaces: &BTreeSet<String>,
    namespace: &str,
    name: &str,
    annotations: Option<&BTreeMap<String, String>>,
) -> bool {
    if ignored_namespaces.contains(namespace) {
        info!(
            { namespace = namespace, name = name },
            "skipping mutation for pod in ignored namespace"
        );
        return false;
    }

    let annotation = |key: &str| {
        annotations
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
            .unwrap_or_default()
    };

    let status = annotation(ANNOTATION_STATUS);
    let required = match StatusToken::parse(status) {
        Some(StatusToken::Injected) => false,
        None => OptOutToken::parse(annotation(ANNOTATION_INJECT)).is_none(),
    };

    debug!(
        { namespace = namespace, name = name, status = status, required = required },
        "evaluated mutation policy"
    );
    required
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignored() -> BTreeSet<String> {
        ["kube-system", "kube-public"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn annotations<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn case_variants(token: &str) -> Vec<String> {
        let mut capitalized = token.to_string();
        capitalized[..1].make_ascii_uppercase();
        vec![token.to_string(), token.to_ascii_uppercase(), capitalized]
    }

    #[test]
    fn ignored_namespace_wins_over_annotations() {
        let opted_in = annotations([(ANNOTATION_INJECT, "yes")]);
        for namespace in ignored() {
            assert!(!is_mutation_required(&ignored(), &namespace, "pod", None));
            assert!(!is_mutation_required(
                &ignored(),
                &namespace,
                "pod",
                Some(&opted_in)
            ));
        }
    }

    #[test]
    fn injected_status_is_case_insensitive() {
        for token in StatusToken::ALL {
            for value in case_variants(token.as_str()) {
                let ann = annotations([(ANNOTATION_STATUS, value.as_str())]);
                assert!(
                    !is_mutation_required(&ignored(), "default", "pod", Some(&ann)),
                    "status {value:?} should skip mutation"
                );
            }
        }
    }

    #[test]
    fn injected_status_wins_over_explicit_opt_in() {
        let ann = annotations([(ANNOTATION_STATUS, "Injected"), (ANNOTATION_INJECT, "true")]);
        assert!(!is_mutation_required(&ignored(), "default", "pod", Some(&ann)));
    }

    #[test]
    fn opt_out_tokens_skip_mutation() {
        assert_eq!(OptOutToken::ALL.len(), 4);
        for token in OptOutToken::ALL {
            for value in case_variants(token.as_str()) {
                let ann = annotations([(ANNOTATION_INJECT, value.as_str())]);
                assert!(
                    !is_mutation_required(&ignored(), "default", "pod", Some(&ann)),
                    "inject {value:?} should skip mutation"
                );
            }
        }
    }

    #[test]
    fn mutates_by_default() {
        assert!(is_mutation_required(&ignored(), "default", "pod", None));
        assert!(is_mutation_required(
            &ignored(),
            "default",
            "pod",
            Some(&BTreeMap::new())
        ));

        for value in ["", "y", "yes", "true", "on", "nope", "0"] {
            let ann = annotations([(ANNOTATION_INJECT, value)]);
            assert!(
                is_mutation_required(&ignored(), "default", "pod", Some(&ann)),
                "inject {value:?} should mutate"
            );
        }
    }

    #[test]
    fn unknown_status_does_not_skip() {
        for value in ["", "pending", "inject", "injected-not"] {
            let ann = annotations([(ANNOTATION_STATUS, value)]);
            assert!(is_mutation_required(&ignored(), "default", "pod", Some(&ann)));
        }
    }

    #[test]
    fn token_parsing() {
        assert_eq!(StatusToken::parse("INJECTED"), Some(StatusToken::Injected));
        assert_eq!(StatusToken::parse(""), None);
        assert_eq!(OptOutToken::parse("Off"), Some(OptOutToken::Off));
        assert_eq!(OptOutToken::parse("N"), Some(OptOutToken::N));
        assert_eq!(OptOutToken::parse("nein"), None);
    }
}
