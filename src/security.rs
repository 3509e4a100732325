//! Security Analyzer: a pure, stateless scan of source text for risky token substrings.
//!
//! Advisory only — findings are surfaced to the user via `/secure_run`, never used to
//! block execution.

/// A single match: a human-readable category and the literal token found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub category: &'static str,
    pub token: &'static str,
}

const CATALOGUE: &[(&str, &str)] = &[
    ("potentially dangerous import", "import os"),
    ("potentially dangerous import", "urllib"),
    ("potentially dangerous import", "requests"),
    ("potentially dangerous import", "socket"),
    ("dynamic code evaluation", "exec("),
    ("dynamic code evaluation", "eval("),
    ("dynamic code evaluation", "__import__"),
    ("process/filesystem access", "subprocess"),
    ("process/filesystem access", "open("),
    ("process/filesystem access", "os.system"),
    ("process/filesystem access", "os.popen"),
    ("process/filesystem access", "sys.exit"),
];

/// Scans `code` for the fixed catalogue of risky tokens. Same input always yields
/// identical findings, in catalogue order.
pub fn analyze(code: &str) -> Vec<Finding> {
    CATALOGUE
        .iter()
        .filter(|(_, token)| code.contains(token))
        .map(|(category, token)| Finding {
            category,
            token,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nothing_in_benign_code() {
        assert!(analyze("print(2 + 2)").is_empty());
    }

    #[test]
    fn finds_dangerous_import() {
        let findings = analyze("import os\nos.system('ls')");
        assert!(findings.iter().any(|f| f.token == "import os"));
        assert!(findings.iter().any(|f| f.token == "os.system"));
    }

    #[test]
    fn is_pure() {
        let code = "eval('1+1')";
        assert_eq!(analyze(code), analyze(code));
    }
}
