//! The security pattern catalog.
//!
//! Every rule is a case-insensitive regex over source text. Rules that need
//! to reject a match based on what follows it carry an `unless` regex,
//! evaluated against the rest of the scanned text after the match.

use regex::Regex;

use crate::error::{ScanError, ScanResult};
use crate::report::{Category, Severity};

const SCRIPT: &[&str] = &[".js", ".ts", ".jsx", ".tsx"];
const SCRIPT_AND_CONFIG: &[&str] = &[".js", ".ts", ".jsx", ".tsx", ".json", ".yaml", ".yml"];
const DEBUG_FILES: &[&str] = &[".js", ".ts", ".jsx", ".tsx", ".json", ".env"];

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct SecurityPattern {
    pub name: String,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    pub fix: String,
    /// Lower-case suffixes this rule applies to; empty means every file.
    pub extensions: Vec<String>,
    /// Match against the whole file instead of line by line.
    pub multiline: bool,
    /// Report every occurrence instead of only the first one in a file.
    pub repeatable: bool,
    matcher: Regex,
    unless: Option<Regex>,
}

impl SecurityPattern {
    /// Compile a rule. The expression is matched case-insensitively.
    pub fn new(
        name: &str,
        category: Category,
        severity: Severity,
        expr: &str,
    ) -> ScanResult<Self> {
        Ok(SecurityPattern {
            name: name.to_string(),
            category,
            severity,
            description: String::new(),
            fix: String::new(),
            extensions: Vec::new(),
            multiline: false,
            repeatable: true,
            matcher: compile(name, expr)?,
            unless: None,
        })
    }

    pub fn describe(mut self, description: &str, fix: &str) -> Self {
        self.description = description.to_string();
        self.fix = fix.to_string();
        self
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Drop matches whose trailing text matches `expr`.
    pub fn unless(mut self, expr: &str) -> ScanResult<Self> {
        self.unless = Some(compile(&self.name, expr)?);
        Ok(self)
    }

    pub fn multiline(mut self) -> Self {
        self.multiline = true;
        self
    }

    pub fn first_only(mut self) -> Self {
        self.repeatable = false;
        self
    }

    pub fn applies_to(&self, path: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        let lower = path.to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn matcher(&self) -> &Regex {
        &self.matcher
    }

    /// Whether `rest` (the text after a match) vetoes that match.
    pub fn vetoed_by(&self, rest: &str) -> bool {
        self.unless.as_ref().is_some_and(|re| re.is_match(rest))
    }
}

/// Rules are identified by name.
impl PartialEq for SecurityPattern {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for SecurityPattern {}

fn compile(name: &str, expr: &str) -> ScanResult<Regex> {
    Regex::new(&format!("(?i){}", expr)).map_err(|source| ScanError::Pattern {
        name: name.to_string(),
        source,
    })
}

struct Rule {
    name: &'static str,
    category: Category,
    severity: Severity,
    expr: &'static str,
    unless: Option<&'static str>,
    multiline: bool,
    repeatable: bool,
    extensions: &'static [&'static str],
    description: &'static str,
    fix: &'static str,
}

const RULES: &[Rule] = &[
    // Prompt injection and tool poisoning
    Rule {
        name: "Tool Poisoning - IMPORTANT Pseudo-Tag",
        category: Category::TokenPassthrough,
        severity: Severity::Block,
        expr: r"<IMPORTANT>[\s\S]*?</IMPORTANT>",
        unless: None,
        multiline: true,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "Tool description contains IMPORTANT pseudo-tags that attempt to override instructions. This is a known tool poisoning attack vector.",
        fix: "Remove all IMPORTANT tags from tool descriptions. Tool descriptions should only describe functionality, not give instructions to the model.",
    },
    Rule {
        name: "Prompt Injection - Ignore Instructions",
        category: Category::TokenPassthrough,
        severity: Severity::Block,
        expr: r"(?:ignore|disregard|forget)[\s\S]*?(?:previous|prior|earlier|above)[\s\S]*?(?:instructions?|prompts?|commands?|rules?)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "Tool description contains prompt injection attempting to override previous instructions.",
        fix: "Remove instruction override attempts from tool descriptions. Descriptions should only explain tool functionality.",
    },
    Rule {
        name: "Prompt Injection - Role Hijacking",
        category: Category::TokenPassthrough,
        severity: Severity::Error,
        expr: r"(?:you are now|act as|pretend to be|role[\s\S]*?(?:system|admin|developer|assistant))",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "Tool description attempts to hijack the assistant role or change system behavior.",
        fix: "Remove role manipulation attempts. Tool descriptions should not try to change the model's role or behavior.",
    },
    Rule {
        name: "Tool Poisoning - Hidden Instructions",
        category: Category::TokenPassthrough,
        severity: Severity::Error,
        expr: r"(?:additionally|also|furthermore|moreover|note that|please|make sure to)[\s\S]*?(?:always|never|must|should)[\s\S]*?(?:do|execute|run|call|invoke)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "Tool description contains hidden instructions that could manipulate model behavior.",
        fix: "Remove instructional language from tool descriptions. Use objective, descriptive language only.",
    },
    Rule {
        name: "Prompt Injection - Base64 Encoding",
        category: Category::TokenPassthrough,
        severity: Severity::Warning,
        expr: r"(?:base64|b64)[\s\S]*?[A-Za-z0-9+/]{20,}={0,2}",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "Tool description contains base64 encoded content that could hide malicious instructions.",
        fix: "Remove base64 encoded content from tool descriptions. All instructions should be in plain, visible text.",
    },
    Rule {
        name: "Tool Poisoning - System Prompt Override",
        category: Category::TokenPassthrough,
        severity: Severity::Block,
        expr: r"(?:system prompt|system message|initial prompt)[\s\S]*?(?:override|replace|change|modify|update)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "Tool description attempts to override or modify the system prompt.",
        fix: "Remove system prompt manipulation attempts. Tool descriptions cannot and should not modify system behavior.",
    },
    Rule {
        name: "Prompt Injection - Multi-Language Attack",
        category: Category::TokenPassthrough,
        severity: Severity::Warning,
        expr: r"(?:中文|日本語|한국어|русский|العربية)[\s\S]*?(?:ignore|override|system|admin)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "Tool description contains non-English text that could hide prompt injection attempts.",
        fix: "Keep tool descriptions in clear English. Label and review any multi-language content.",
    },
    // Token passthrough
    Rule {
        name: "Token Passthrough - Direct Pass",
        category: Category::TokenPassthrough,
        severity: Severity::Block,
        expr: r#"(?:request\.headers\[['"]authorization['"]\]|req\.headers\[['"]authorization['"]\]|headers\[['"]authorization['"]\])[\s\S]*?(?:fetch|axios|request)[\s\S]*?headers:\s*\{\s*['"]?authorization['"]?:\s*(?:request\.headers\[['"]authorization['"]\]|req\.headers\[['"]authorization['"]\]|headers\[['"]authorization['"]\])"#,
        unless: None,
        multiline: true,
        repeatable: true,
        extensions: SCRIPT,
        description: "Server passes incoming authorization tokens to upstream calls without validation, bypassing security controls.",
        fix: "Validate that tokens were issued for this server before use. Never pass through unvalidated tokens; check the token audience.",
    },
    Rule {
        name: "Token Passthrough - Proxy Pattern",
        category: Category::TokenPassthrough,
        severity: Severity::Block,
        expr: r"(?:proxy|forward|passthrough)[\s\S]*?(?:token|authorization|bearer)[\s\S]*?(?:without|skip|bypass)[\s\S]*?(?:validation|verify|check)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "Code comments or identifiers suggest tokens are forwarded without validation.",
        fix: "Implement token validation. Make sure tokens were issued for this server before forwarding requests.",
    },
    Rule {
        name: "Token Passthrough - Direct Forward",
        category: Category::TokenPassthrough,
        severity: Severity::Error,
        expr: r"req\.headers\s*=\s*originalReq\.headers|request\.headers\s*=\s*clientHeaders|headers:\s*req\.headers",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "The entire header object is forwarded, likely including unvalidated authorization tokens.",
        fix: "Forward only specific validated headers. Never forward authorization headers without validation.",
    },
    // Confused deputy
    Rule {
        name: "Confused Deputy - Static Client ID Risk",
        category: Category::ConfusedDeputy,
        severity: Severity::Error,
        expr: r#"(?:client_id|clientId):\s*['"][^'"]*['"][\s\S]*?(?:register|registration)[\s\S]*?(?:dynamic|runtime)"#,
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "A static client id combined with dynamic client registration may create a confused deputy vulnerability.",
        fix: "Obtain user consent for each dynamically registered client. Do not rely on consent cookies alone.",
    },
    Rule {
        name: "Confused Deputy - Missing Consent Validation",
        category: Category::ConfusedDeputy,
        severity: Severity::Warning,
        expr: r"(?:consent|authorization)[\s\S]*?(?:skip|bypass|cookie)[\s\S]*?(?:redirect|callback)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "Consent may be bypassed using cookies, which can lead to confused deputy attacks.",
        fix: "Always obtain explicit user consent for each client, even when a consent cookie exists.",
    },
    Rule {
        name: "Confused Deputy - Unsafe Redirect",
        category: Category::ConfusedDeputy,
        severity: Severity::Error,
        expr: r"redirect_uri[^=]*=\s*(?:req\.query\.|request\.query\.|params\.)\w*",
        unless: Some(r"validate"),
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "A caller-provided redirect URI is used without validation.",
        fix: "Validate every redirect URI against an allow-list of domains before using it.",
    },
    // Session hijacking
    Rule {
        name: "Session Hijacking - Insecure Session ID",
        category: Category::SessionHijacking,
        severity: Severity::Error,
        expr: r"(?:sessionId|session_id)\s*=\s*(?:Math\.random|Date\.now|increment|counter|\d+)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "Session ids are generated predictably and can be guessed.",
        fix: "Use cryptographically secure random session ids such as crypto.randomUUID().",
    },
    Rule {
        name: "Session Hijacking - Session for Auth",
        category: Category::SessionHijacking,
        severity: Severity::Block,
        expr: r"(?:authenticate|auth|login)[\s\S]*?(?:session|sessionId)[\s\S]*?(?:return|respond|send)",
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "Sessions are used for authentication. Sessions must not be used for authentication.",
        fix: "Remove session-based authentication and use token-based authentication instead.",
    },
    Rule {
        name: "Session Hijacking - Missing User Binding",
        category: Category::SessionHijacking,
        severity: Severity::Warning,
        expr: r"(?:session|queue)[\s\S]*?(?:sessionId|session_id)",
        unless: Some(r"userId|user_id|bind|combined"),
        multiline: false,
        repeatable: false,
        extensions: SCRIPT,
        description: "Session ids are not bound to user-specific information, which makes hijacking easier.",
        fix: "Bind session ids to the user, for example as <user_id>:<session_id>.",
    },
    Rule {
        name: "Session Hijacking - Insecure Cookie Config",
        category: Category::SessionHijacking,
        severity: Severity::Error,
        expr: r#"(?:cookie|session)[\s\S]*?(?:secure:\s*false|httpOnly:\s*false|sameSite:\s*['"]?none['"]?)"#,
        unless: None,
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "Insecure cookie settings make session hijacking easier.",
        fix: "Set secure: true, httpOnly: true and sameSite: \"strict\" on all session cookies.",
    },
    // Missing validation
    Rule {
        name: "Missing Token Validation",
        category: Category::MissingValidation,
        severity: Severity::Error,
        expr: r"(?:bearer|authorization|token)[\s\S]*?(?:req|request)[\s\S]*?(?:headers|header)",
        unless: Some(r"verify|validate|check|audience"),
        multiline: false,
        repeatable: false,
        extensions: SCRIPT,
        description: "Authorization tokens are used without validation.",
        fix: "Validate tokens, including audience, expiry and signature.",
    },
    Rule {
        name: "Missing Input Validation",
        category: Category::MissingValidation,
        severity: Severity::Warning,
        expr: r"(?:req\.query|req\.params|req\.body)[\s\S]*?(?:sql|database|db)",
        unless: Some(r"sanitize|validate|escape"),
        multiline: false,
        repeatable: true,
        extensions: SCRIPT,
        description: "User input reaches database queries without validation or sanitization.",
        fix: "Validate and sanitize user input before it reaches a query. Use parameterized queries.",
    },
    // Insecure configuration
    Rule {
        name: "Insecure Transport - HTTP Only",
        category: Category::InsecureConfig,
        severity: Severity::Error,
        expr: r#"http://|protocol:\s*['"]http['"]|secure:\s*false"#,
        unless: Some(r"localhost"),
        multiline: false,
        repeatable: true,
        extensions: SCRIPT_AND_CONFIG,
        description: "The server is configured to use HTTP instead of HTTPS in production.",
        fix: "Always use HTTPS in production and set secure: true on cookies and connections.",
    },
    Rule {
        name: "Insecure CORS Configuration",
        category: Category::InsecureConfig,
        severity: Severity::Warning,
        expr: r"(?:cors|origin)[\s\S]*?(?:\*|allowOrigin:\s*\*|origin:\s*\*)",
        unless: None,
        multiline: false,
        repeatable: false,
        extensions: SCRIPT,
        description: "CORS allows every origin.",
        fix: "Restrict CORS to specific origins instead of the * wildcard.",
    },
    Rule {
        name: "Debug Mode in Production",
        category: Category::InsecureConfig,
        severity: Severity::Warning,
        expr: r"debug[\s\S]*?(?:true|enabled|on)",
        unless: Some(r"development|dev|test"),
        multiline: false,
        repeatable: false,
        extensions: DEBUG_FILES,
        description: "Debug mode appears to be enabled and may leak sensitive information.",
        fix: "Disable debug mode in production and drive it from environment variables.",
    },
];

/// The read-only set of rules a scan runs.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    patterns: Vec<SecurityPattern>,
}

impl PatternCatalog {
    /// Compile the built-in rule set.
    pub fn builtin() -> ScanResult<Self> {
        let mut patterns = Vec::with_capacity(RULES.len());
        for rule in RULES {
            let mut pattern = SecurityPattern::new(rule.name, rule.category, rule.severity, rule.expr)?
                .describe(rule.description, rule.fix)
                .extensions(rule.extensions);
            if let Some(unless) = rule.unless {
                pattern = pattern.unless(unless)?;
            }
            if rule.multiline {
                pattern = pattern.multiline();
            }
            if !rule.repeatable {
                pattern = pattern.first_only();
            }
            patterns.push(pattern);
        }
        Ok(PatternCatalog { patterns })
    }

    pub fn from_patterns(patterns: Vec<SecurityPattern>) -> Self {
        PatternCatalog { patterns }
    }

    pub fn patterns(&self) -> &[SecurityPattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn by_category(&self, category: Category) -> Vec<&SecurityPattern> {
        self.patterns.iter().filter(|p| p.category == category).collect()
    }

    pub fn by_severity(&self, severity: Severity) -> Vec<&SecurityPattern> {
        self.patterns.iter().filter(|p| p.severity == severity).collect()
    }

    /// Rules whose findings prevent deployment.
    pub fn blocking(&self) -> Vec<&SecurityPattern> {
        self.by_severity(Severity::Block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_compiles() {
        let catalog = PatternCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), RULES.len());
        assert_eq!(catalog.len(), 22);
    }

    #[test]
    fn test_catalog_queries() {
        let catalog = PatternCatalog::builtin().unwrap();
        assert_eq!(catalog.blocking().len(), 6);
        assert!(catalog
            .blocking()
            .iter()
            .all(|p| p.severity == Severity::Block));
        assert_eq!(catalog.by_category(Category::ConfusedDeputy).len(), 3);
        assert_eq!(catalog.by_category(Category::InsecureConfig).len(), 3);
        let total: usize = Category::ALL
            .iter()
            .map(|c| catalog.by_category(*c).len())
            .sum();
        assert_eq!(total, catalog.len());
    }

    #[test]
    fn test_extension_filter() {
        let catalog = PatternCatalog::builtin().unwrap();
        let debug = catalog
            .patterns()
            .iter()
            .find(|p| p.name == "Debug Mode in Production")
            .unwrap();
        assert!(debug.applies_to("config/.env"));
        assert!(debug.applies_to("src/Server.TS"));
        assert!(!debug.applies_to("values.yaml"));

        let any = SecurityPattern::new("any", Category::InsecureConfig, Severity::Info, "x").unwrap();
        assert!(any.applies_to("whatever.bin"));
    }

    #[test]
    fn test_unless_vetoes_on_trailing_text() {
        let redirect = SecurityPattern::new(
            "redirect",
            Category::ConfusedDeputy,
            Severity::Error,
            r"redirect_uri\s*=",
        )
        .unwrap()
        .unless("validate")
        .unwrap();
        assert!(redirect.vetoed_by(" req.query.next; validateRedirect(x)"));
        assert!(redirect.vetoed_by(" VALIDATE"));
        assert!(!redirect.vetoed_by(" req.query.next;"));
    }

    #[test]
    fn test_invalid_expression_is_reported() {
        let err = SecurityPattern::new("broken", Category::InsecureConfig, Severity::Info, "(unclosed")
            .unwrap_err();
        assert!(matches!(err, ScanError::Pattern { ref name, .. } if name == "broken"));
    }
}
