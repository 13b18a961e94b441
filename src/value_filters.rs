use std::{collections::BTreeMap, str::FromStr};

use gateway_api::httproutes::{
    HTTPRouteRulesMatchesHeaders, HTTPRouteRulesMatchesHeadersType,
    HTTPRouteRulesMatchesQueryParams, HTTPRouteRulesMatchesQueryParamsType,
};

use crate::{consts, err::AnnogateError};

/// Enum of all possible rules for header and query filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    /// Equal rule checks if the key is equal to the value.
    Equal(String, String),
    /// `RegularExpression` rule checks if the key matches the value.
    RegularExpression(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherList(pub Vec<MatchRule>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersMatchersList(pub MatcherList);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMatchersList(pub MatcherList);

impl MatchRule {
    /// Concrete single-value variants of this rule. Equality rules may
    /// carry `a|b` alternatives; regex rules keep `|` as regex alternation.
    fn expand(&self) -> Vec<MatchRule> {
        match self {
            MatchRule::Equal(key, value) => value
                .split('|')
                .map(|alt| MatchRule::Equal(key.clone(), alt.trim().to_string()))
                .collect(),
            MatchRule::RegularExpression(..) => vec![self.clone()],
        }
    }
}

impl MatcherList {
    /// Collects weighted matcher annotations (`<ns>/<family>.<weight>`)
    /// from both namespaces, ordered by weight. The current namespace wins
    /// when both define the same weight. Unparseable rules are logged and
    /// skipped.
    pub fn from_annotations(annotations: &BTreeMap<String, String>, family: &str) -> Self {
        let mut rules = BTreeMap::<i32, MatchRule>::new();
        for ns in [consts::LEGACY_ANNOTATION_PREFIX, consts::ANNOTATION_PREFIX] {
            let prefix = format!("{ns}/{family}.");
            for (name, value) in annotations
                .iter()
                .filter(|(key, _)| key.starts_with(&prefix))
            {
                let Ok(weight) = name[prefix.len()..].parse::<i32>() else {
                    continue;
                };
                match MatchRule::from_str(value) {
                    Ok(rule) => {
                        rules.insert(weight, rule);
                    }
                    Err(err) => {
                        tracing::error!("Failed to parse rule from annotation '{name}': {err}");
                    }
                }
            }
        }
        Self(rules.into_values().collect())
    }

    /// Expands value alternatives into every concrete combination of rules.
    /// An empty list expands to nothing.
    pub fn cartesian_product(&self) -> Vec<Vec<MatchRule>> {
        if self.0.is_empty() {
            return vec![];
        }
        let alternatives: Vec<Vec<MatchRule>> =
            self.0.iter().map(|rule| rule.expand()).collect();
        let slices: Vec<&[MatchRule]> = alternatives.iter().map(|alt| alt.as_slice()).collect();
        let mut res = vec![];
        permutator::cartesian_product(slices.as_slice(), |product| {
            res.push(product.iter().map(|rule| (*rule).clone()).collect());
        });
        res
    }
}

impl From<HeadersMatchersList> for Vec<HTTPRouteRulesMatchesHeaders> {
    fn from(value: HeadersMatchersList) -> Self {
        value
            .0
            .0
            .into_iter()
            .map(|matcher| match matcher {
                MatchRule::Equal(key, val) => HTTPRouteRulesMatchesHeaders {
                    name: key,
                    r#type: Some(HTTPRouteRulesMatchesHeadersType::Exact),
                    value: val,
                },
                MatchRule::RegularExpression(key, val) => HTTPRouteRulesMatchesHeaders {
                    name: key,
                    r#type: Some(HTTPRouteRulesMatchesHeadersType::RegularExpression),
                    value: val,
                },
            })
            .collect()
    }
}

impl From<QueryMatchersList> for Vec<HTTPRouteRulesMatchesQueryParams> {
    fn from(value: QueryMatchersList) -> Self {
        value
            .0
            .0
            .into_iter()
            .map(|matcher| match matcher {
                MatchRule::Equal(key, val) => HTTPRouteRulesMatchesQueryParams {
                    name: key,
                    r#type: Some(HTTPRouteRulesMatchesQueryParamsType::Exact),
                    value: val,
                },
                MatchRule::RegularExpression(key, val) => HTTPRouteRulesMatchesQueryParams {
                    name: key,
                    r#type: Some(HTTPRouteRulesMatchesQueryParamsType::RegularExpression),
                    value: val,
                },
            })
            .collect()
    }
}

/// Parse a match rule from string.
/// The string should be in the following format:
/// `key=value`, or `key~=value` for regex matching.
impl FromStr for MatchRule {
    type Err = AnnogateError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        match rule.split_once('=') {
            Some((key, value)) => {
                if let Some(key) = key.strip_suffix('~') {
                    return Ok(MatchRule::RegularExpression(
                        key.to_string(),
                        value.to_string(),
                    ));
                }
                Ok(MatchRule::Equal(key.to_string(), value.to_string()))
            }
            _ => Err(anyhow::anyhow!("Invalid rule found '{rule}'").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::{MatchRule, MatcherList};

    fn to_map(entries: &[(&str, &str)]) -> std::collections::BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn equal(key: &str, value: &str) -> MatchRule {
        MatchRule::Equal(key.to_string(), value.to_string())
    }

    fn regex(key: &str, value: &str) -> MatchRule {
        MatchRule::RegularExpression(key.to_string(), value.to_string())
    }

    #[rstest]
    #[case("env=prod", equal("env", "prod"))]
    #[case("env~=prod", regex("env", "prod"))]
    #[case("env=", equal("env", ""))]
    fn test_rules(#[case] raw: &str, #[case] expected: MatchRule) {
        let rule = MatchRule::from_str(raw).unwrap();
        assert_eq!(rule, expected);
    }

    #[test]
    fn test_invalid_rule() {
        assert!(MatchRule::from_str("no-delimiter").is_err());
    }

    #[rstest]
    #[case::ordered_by_weight(
        &[
            ("annogate.io/header_match.1", "env=prod"),
            ("annogate.io/header_match.2", "env~=dev"),
        ],
        MatcherList(vec![equal("env", "prod"), regex("env", "dev")])
    )]
    #[case::weight_order_beats_key_order(
        &[
            ("annogate.io/header_match.2", "env=prod"),
            ("annogate.io/header_match.1", "env~=dev"),
        ],
        MatcherList(vec![regex("env", "dev"), equal("env", "prod")])
    )]
    #[case::invalid_rules_are_skipped(
        &[
            ("annogate.io/header_match.2", "invalid"),
            ("annogate.io/header_match.1", "env=dev"),
        ],
        MatcherList(vec![equal("env", "dev")])
    )]
    #[case::legacy_namespace_is_read(
        &[("annogate-gateway/header_match.1", "env=prod")],
        MatcherList(vec![equal("env", "prod")])
    )]
    #[case::current_namespace_wins_per_weight(
        &[
            ("annogate-gateway/header_match.1", "env=old"),
            ("annogate.io/header_match.1", "env=new"),
            ("annogate-gateway/header_match.2", "tier=backend"),
        ],
        MatcherList(vec![equal("env", "new"), equal("tier", "backend")])
    )]
    #[case::other_families_are_ignored(
        &[
            ("annogate.io/query_match.1", "debug=1"),
            ("annogate.io/header_match.bogus", "env=prod"),
        ],
        MatcherList(vec![])
    )]
    fn from_annotations(#[case] annotations: &[(&str, &str)], #[case] expected: MatcherList) {
        let matcher_list = MatcherList::from_annotations(&to_map(annotations), "header_match");
        assert_eq!(matcher_list, expected);
    }

    #[test]
    fn cartesian_product_expands_alternatives() {
        let list = MatcherList(vec![equal("env", "prod|dev"), equal("tier", "web")]);
        assert_eq!(
            list.cartesian_product(),
            vec![
                vec![equal("env", "prod"), equal("tier", "web")],
                vec![equal("env", "dev"), equal("tier", "web")],
            ]
        );
    }

    #[test]
    fn cartesian_product_keeps_regex_alternation() {
        let list = MatcherList(vec![regex("env", "prod|dev")]);
        assert_eq!(
            list.cartesian_product(),
            vec![vec![regex("env", "prod|dev")]]
        );
    }

    #[test]
    fn cartesian_product_of_empty_list() {
        assert!(MatcherList(vec![]).cartesian_product().is_empty());
    }
}
