use std::fmt;

/// Display name of a service, by the shape of its route patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceName {
    /// A single pattern that ends where it starts.
    Loop { first: String, middle: String },
    /// A single pattern between two stops.
    OneWay { first: String, last: String },
    /// Two patterns whose both ends carry the same names.
    Shared(String),
    /// Two patterns between distinct ends; each side may list several stops.
    Diverging { origins: String, destinations: String },
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceName::Loop { first, middle } => write!(f, "{first} ⟲ {middle}"),
            ServiceName::OneWay { first, last } => write!(f, "{first} → {last}"),
            ServiceName::Shared(name) => write!(f, "{name}"),
            ServiceName::Diverging { origins, destinations } => write!(f, "{origins} ⇄ {destinations}"),
        }
    }
}

fn join_names<F>(stops: &[&str], name_of: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let names = stops.iter().map(|s| name_of(*s)).collect::<Option<Vec<_>>>()?;
    Some(names.join(" / "))
}

/// Names a service from the stop codes of its patterns. Only the first two
/// patterns are considered. Returns `None` when a needed stop has no name or a
/// pattern is too short to name.
pub fn synthesize_name<F>(routes: &[Vec<String>], name_of: F) -> Option<ServiceName>
where
    F: Fn(&str) -> Option<String>,
{
    match routes {
        [] => None,
        [route] => {
            let (first, rest) = route.split_first()?;
            let last = rest.last()?;
            if first == last {
                let middle = &rest[(rest.len() - 1) / 2];
                Some(ServiceName::Loop {
                    first: name_of(first.as_str())?,
                    middle: name_of(middle.as_str())?,
                })
            } else {
                Some(ServiceName::OneWay {
                    first: name_of(first.as_str())?,
                    last: name_of(last.as_str())?,
                })
            }
        }
        [one, two, ..] => {
            let (one_first, one_last) = (one.first()?.as_str(), one.last()?.as_str());
            let (two_first, two_last) = (two.first()?.as_str(), two.last()?.as_str());
            // Each end is checked against the other direction independently.
            let origins = if one_first == two_last {
                vec![one_first]
            } else {
                vec![one_first, two_last]
            };
            let destinations = if two_first == one_last {
                vec![one_last]
            } else {
                vec![one_last, two_first]
            };
            let origins = join_names(&origins, &name_of)?;
            let destinations = join_names(&destinations, &name_of)?;
            if origins == destinations {
                Some(ServiceName::Shared(origins))
            } else {
                Some(ServiceName::Diverging { origins, destinations })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(stops: &[&str]) -> Vec<String> {
        stops.iter().map(|s| s.to_string()).collect()
    }

    fn name_of(code: &str) -> Option<String> {
        match code {
            "X" => None,
            _ => Some(format!("Stop {code}")),
        }
    }

    #[test]
    fn loop_uses_midpoint_of_remaining_stops() {
        let name = synthesize_name(&[route(&["S1", "S2", "S3", "S4", "S1"])], name_of).unwrap();
        assert_eq!(name, ServiceName::Loop { first: "Stop S1".into(), middle: "Stop S3".into() });
        assert_eq!(name.to_string(), "Stop S1 ⟲ Stop S3");
    }

    #[test]
    fn short_loop() {
        let name = synthesize_name(&[route(&["S1", "S2", "S1"])], name_of).unwrap();
        assert_eq!(name.to_string(), "Stop S1 ⟲ Stop S2");
    }

    #[test]
    fn one_way() {
        let name = synthesize_name(&[route(&["S1", "S2", "S3"])], name_of).unwrap();
        assert_eq!(name.to_string(), "Stop S1 → Stop S3");
    }

    #[test]
    fn mirrored_directions() {
        let name = synthesize_name(&[route(&["A", "M", "B"]), route(&["B", "M", "A"])], name_of).unwrap();
        assert_eq!(name.to_string(), "Stop A ⇄ Stop B");
    }

    #[test]
    fn diverging_ends_list_both_stops() {
        let name = synthesize_name(&[route(&["A", "M", "B"]), route(&["C", "M", "D"])], name_of).unwrap();
        assert_eq!(
            name,
            ServiceName::Diverging {
                origins: "Stop A / Stop D".into(),
                destinations: "Stop B / Stop C".into()
            }
        );
    }

    #[test]
    fn ends_are_checked_independently() {
        // Direction two returns to A but starts elsewhere.
        let name = synthesize_name(&[route(&["A", "M", "B"]), route(&["C", "M", "A"])], name_of).unwrap();
        assert_eq!(name.to_string(), "Stop A ⇄ Stop B / Stop C");
    }

    #[test]
    fn identical_end_names_collapse() {
        let same = |_: &str| Some("Interchange".to_string());
        let name = synthesize_name(&[route(&["A", "M", "B"]), route(&["B", "M", "A"])], same).unwrap();
        assert_eq!(name, ServiceName::Shared("Interchange".into()));
    }

    #[test]
    fn unnameable_routes() {
        assert_eq!(synthesize_name(&[], name_of), None);
        assert_eq!(synthesize_name(&[route(&["S1"])], name_of), None);
        assert_eq!(synthesize_name(&[route(&["S1", "X"])], name_of), None);
        assert_eq!(synthesize_name(&[route(&["A", "B"]), route(&[])], name_of), None);
    }
}
