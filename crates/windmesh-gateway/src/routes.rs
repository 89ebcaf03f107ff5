use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use windmesh_common::MeshError;

/// One `prefix=service` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub service_name: String,
}

impl FromStr for Route {
    type Err = MeshError;

    /// Parses `prefix=service`; a leading `/` on the prefix is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, service_name) = s
            .split_once('=')
            .ok_or_else(|| MeshError::InvalidRequest(format!("Route must be prefix=service, got {:?}", s)))?;

        let prefix = prefix.trim().trim_start_matches('/');
        let service_name = service_name.trim();
        if prefix.is_empty() || prefix.contains('/') || service_name.is_empty() {
            return Err(MeshError::InvalidRequest(format!("Invalid route {:?}", s)));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            service_name: service_name.to_string(),
        })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{} -> {}", self.prefix, self.service_name)
    }
}

/// Static first-path-segment to service-name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|route| (route.prefix, route.service_name))
                .collect(),
        }
    }

    /// Service that owns `path`, keyed on its first segment.
    pub fn service_for_path(&self, path: &str) -> Option<&str> {
        let prefix = first_segment(path)?;
        self.routes.get(prefix).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(p, s)| (p.as_str(), s.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new([
            Route {
                prefix: "app".to_string(),
                service_name: "application-server".to_string(),
            },
            Route {
                prefix: "broker".to_string(),
                service_name: "wing-egress-broker".to_string(),
            },
            Route {
                prefix: "services".to_string(),
                service_name: "service-discovery".to_string(),
            },
        ])
    }
}

/// `"/x/ping"` gives `Some("x")`; `"/"` and `"//x"` give `None`.
pub fn first_segment(path: &str) -> Option<&str> {
    path.strip_prefix('/')?
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_segment() {
        assert_eq!(first_segment("/x/ping"), Some("x"));
        assert_eq!(first_segment("/x"), Some("x"));
        assert_eq!(first_segment("/x/"), Some("x"));
        assert_eq!(first_segment("/"), None);
        assert_eq!(first_segment(""), None);
        assert_eq!(first_segment("//x"), None);
    }

    #[test]
    fn test_default_routes() {
        let table = RouteTable::default();
        assert_eq!(table.len(), 3);
        assert_eq!(table.service_for_path("/app/weather"), Some("application-server"));
        assert_eq!(table.service_for_path("/broker"), Some("wing-egress-broker"));
        assert_eq!(table.service_for_path("/services/list"), Some("service-discovery"));
        assert_eq!(table.service_for_path("/unknown/path"), None);
    }

    #[test]
    fn test_prefix_match_is_whole_segment() {
        let table = RouteTable::default();
        assert_eq!(table.service_for_path("/application/x"), None);
        assert_eq!(table.service_for_path("/ap/x"), None);
    }

    #[test]
    fn test_parse_route() {
        let route: Route = "x=svc-a".parse().unwrap();
        assert_eq!(route.prefix, "x");
        assert_eq!(route.service_name, "svc-a");

        let route: Route = "/x = svc-a".parse().unwrap();
        assert_eq!(route.prefix, "x");
        assert_eq!(route.to_string(), "/x -> svc-a");
    }

    #[test]
    fn test_parse_route_rejects_garbage() {
        assert!("x".parse::<Route>().is_err());
        assert!("=svc".parse::<Route>().is_err());
        assert!("x=".parse::<Route>().is_err());
        assert!("a/b=svc".parse::<Route>().is_err());
    }

    #[test]
    fn test_later_route_wins() {
        let table = RouteTable::new(["x=svc-a".parse().unwrap(), "x=svc-b".parse().unwrap()]);
        assert_eq!(table.service_for_path("/x"), Some("svc-b"));
    }
}
