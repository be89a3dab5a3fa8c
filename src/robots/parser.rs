//! Robots.txt parser
//!
//! Allow/disallow matching is delegated to the `robotstxt` crate; crawl-delay
//! is read from the user-agent groups directly since that crate does not
//! expose it.

use robotstxt::DefaultMatcher;

/// One `User-agent` group and the crawl delay it declares
#[derive(Debug, Clone, PartialEq)]
struct AgentGroup {
    agents: Vec<String>,
    crawl_delay: Option<f64>,
}

/// Parsed robots.txt for one host
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRobots {
    body: Option<String>,
    groups: Vec<AgentGroup>,
}

impl ParsedRobots {
    /// Parses raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            body: Some(content.to_string()),
            groups: parse_groups(content),
        }
    }

    /// Robots that impose no constraints
    ///
    /// Used when a host has no robots.txt or it could not be fetched.
    pub fn allow_all() -> Self {
        Self {
            body: None,
            groups: Vec::new(),
        }
    }

    pub fn is_allow_all(&self) -> bool {
        self.body.as_deref().map_or(true, |b| b.trim().is_empty())
    }

    /// Checks whether `user_agent` may fetch `url` (a full URL or a path)
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match self.body.as_deref() {
            Some(body) if !body.trim().is_empty() => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, user_agent, url)
            }
            _ => true,
        }
    }

    /// Crawl delay for `user_agent`, preferring its own group over `*`
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent = user_agent.to_lowercase();

        let specific = self
            .groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a != "*" && agent.contains(a.as_str())))
            .find_map(|g| g.crawl_delay);

        specific.or_else(|| {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .find_map(|g| g.crawl_delay)
        })
    }
}

/// Splits robots.txt into user-agent groups
///
/// Consecutive `User-agent` lines share a group; the first rule line after
/// them closes the agent list.
fn parse_groups(content: &str) -> Vec<AgentGroup> {
    let mut groups: Vec<AgentGroup> = Vec::new();
    let mut collecting_agents = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !collecting_agents {
                    groups.push(AgentGroup {
                        agents: Vec::new(),
                        crawl_delay: None,
                    });
                    collecting_agents = true;
                }
                if let Some(group) = groups.last_mut() {
                    group.agents.push(value.to_lowercase());
                }
            }
            "crawl-delay" => {
                collecting_agents = false;
                if let (Some(group), Ok(delay)) = (groups.last_mut(), value.parse::<f64>()) {
                    if delay.is_finite() && delay >= 0.0 {
                        group.crawl_delay = Some(delay);
                    }
                }
            }
            _ => collecting_agents = false,
        }
    }

    groups
}
