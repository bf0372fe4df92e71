use crate::errors::TriageError;
use crate::types::Severity;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

/// Plain record form of a failure signature, as declared in the built-in table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureSpec {
    pub id: &'static str,
    pub priority: u32,
    pub severity: Severity,
    pub pattern: &'static str,
    pub cause: &'static str,
    pub verify: &'static [&'static str],
    pub fix: &'static [&'static str],
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub id: &'static str,
    pub priority: u32,
    pub severity: Severity,
    pub pattern: Regex,
    pub cause: &'static str,
    pub verify: &'static [&'static str],
    pub fix: &'static [&'static str],
}

impl Signature {
    pub fn is_match(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}

/// Compiled, immutable signature table. Declaration order is preserved and
/// serves as the tie-break between equal priorities.
#[derive(Debug, Clone)]
pub struct Catalogue {
    signatures: Vec<Signature>,
}

impl Catalogue {
    pub fn builtin() -> Result<Self, TriageError> {
        Self::from_specs(BUILTIN_SIGNATURES)
    }

    pub fn from_specs(specs: &[SignatureSpec]) -> Result<Self, TriageError> {
        let mut seen = BTreeSet::new();
        let mut signatures = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.id) {
                return Err(TriageError::InvalidCatalogue(format!(
                    "duplicate signature id {}",
                    spec.id
                )));
            }
            let pattern = RegexBuilder::new(spec.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    TriageError::InvalidCatalogue(format!("signature {}: {e}", spec.id))
                })?;
            signatures.push(Signature {
                id: spec.id,
                priority: spec.priority,
                severity: spec.severity,
                pattern,
                cause: spec.cause,
                verify: spec.verify,
                fix: spec.fix,
            });
        }
        Ok(Self { signatures })
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn get(&self, id: &str) -> Option<&Signature> {
        self.signatures.iter().find(|signature| signature.id == id)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

pub const BUILTIN_SIGNATURES: &[SignatureSpec] = &[
    SignatureSpec {
        id: "NGINX_UPSTREAM_SELINUX",
        priority: 10,
        severity: Severity::P0,
        pattern: r"connect\(\) .* failed \(13: Permission denied\)",
        cause: "Nginx reverse proxy blocked by SELinux (httpd_t may not open outbound connections by default)",
        verify: &["getenforce", "tail -n 50 /var/log/nginx/error.log"],
        fix: &[
            "setsebool -P httpd_can_network_connect 1",
            "systemctl restart nginx",
        ],
    },
    SignatureSpec {
        id: "NGINX_UPSTREAM_REFUSED",
        priority: 30,
        severity: Severity::P1,
        pattern: r"connect\(\) failed \(111: Connection refused\)",
        cause: "Upstream refused the connection: service not listening, down, or wrong port",
        verify: &["curl -I http://<upstream>:8080/", "ss -lntp | grep 8080"],
        fix: &[
            "Confirm Tomcat/the application is listening on 8080",
            "Check firewall/security group rules allow 8080",
        ],
    },
    SignatureSpec {
        id: "NGINX_UPSTREAM_TIMEOUT",
        priority: 40,
        severity: Severity::P1,
        pattern: r"upstream timed out|Connection timed out",
        cause: "Upstream timed out: network unreachable, firewall dropping packets, or upstream hung",
        verify: &[
            "ping <upstream>",
            "curl -I http://<upstream>:8080/",
            "firewall-cmd --list-all",
        ],
        fix: &[
            "Open the port and check routing",
            "Investigate upstream performance or a hung upstream process",
        ],
    },
    SignatureSpec {
        id: "NGINX_DNS_FAIL",
        priority: 50,
        severity: Severity::P2,
        pattern: r"host not found in upstream",
        cause: "Upstream hostname did not resolve: DNS or hosts file misconfiguration",
        verify: &["getent hosts node2.itcast.cn", "cat /etc/resolv.conf"],
        fix: &[
            "Fix /etc/hosts or DNS",
            "Verify against the upstream IP address directly",
        ],
    },
    SignatureSpec {
        id: "TOMCAT_DB_ACCESS_DENIED",
        priority: 20,
        severity: Severity::P0,
        pattern: r"Access denied for user .*@'localhost'|CannotGetJdbcConnectionException",
        cause: "Application failed to start: database authentication failed, so the connection pool could not initialize",
        verify: &[
            "tail -n 200 catalina.out",
            "/opt/mysql/bin/mysql -uroot -p --socket=/tmp/mysql.sock",
        ],
        fix: &[
            "Correct the database username/password in application.yml",
            "Create a dedicated application account instead of using root",
        ],
    },
    SignatureSpec {
        id: "TOMCAT_DEPLOY_FAIL",
        priority: 60,
        severity: Severity::P2,
        pattern: r"Error deploying web application archive|LifecycleException",
        cause: "WAR deployment/startup failed (often caused by dependencies or the database connection)",
        verify: &["tail -n 200 catalina.out", "ls -l webapps/"],
        fix: &["Fix the specific underlying exception above first, then restart Tomcat"],
    },
    SignatureSpec {
        id: "MYSQL_LIBNCURSES_MISSING",
        priority: 25,
        severity: Severity::P0,
        pattern: r"libncurses\.so\.5.*cannot open shared object file",
        cause: "MySQL client dependency missing (common on CentOS 9: libncurses.so.5)",
        verify: &[
            "ldd /opt/mysql/bin/mysql | grep ncurses",
            "dnf provides '*/libncurses.so.5'",
        ],
        fix: &["Enable epel/crb, then install ncurses-compat-libs"],
    },
];
