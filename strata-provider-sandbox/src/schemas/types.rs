//! Sandbox-specific type definitions

use std::sync::LazyLock;

use regex::Regex;
use strata_core::resource::Value;
use strata_core::schema::AttributeType;

/// Regions the sandbox simulates
pub const VALID_REGIONS: &[&str] = &["sbx-east-1", "sbx-west-1", "sbx-central-1"];

static AVAILABILITY_ZONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^sbx-(east|west|central)-1[a-c]$").expect("valid regex"));

/// Load balancer and target group names: alphanumerics and hyphens, no leading or trailing hyphen
static ELB_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,30}[A-Za-z0-9])?$").expect("valid regex")
});

static IAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w+=,.@-]{1,64}$").expect("valid regex"));

static GROUP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9 ._\-:/()#,@\[\]+=&;{}!$*]{1,255}$").expect("valid regex")
});

static CLUSTER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").expect("valid regex"));

static ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:(sandbox|aws):[a-z0-9-]+:[a-z0-9-]*:(\d{12}|aws)?:.+$").expect("valid regex")
});

static IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+([._/-][a-z0-9]+)*(:[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?$")
        .expect("valid regex")
});

fn matches(re: &Regex, what: &str, value: &Value) -> Result<(), String> {
    match value {
        Value::String(s) if re.is_match(s) => Ok(()),
        Value::String(s) => Err(format!("'{}' is not a valid {}", s, what)),
        _ => Err("Expected string".to_string()),
    }
}

pub fn region() -> AttributeType {
    AttributeType::Enum(VALID_REGIONS.iter().map(|r| r.to_string()).collect())
}

pub fn availability_zone() -> AttributeType {
    AttributeType::Custom {
        name: "AvailabilityZone".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| matches(&AVAILABILITY_ZONE, "availability zone", value),
    }
}

pub fn elb_name() -> AttributeType {
    AttributeType::Custom {
        name: "ElbName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| matches(&ELB_NAME, "load balancing name (1-32 alphanumerics or hyphens)", value),
    }
}

pub fn iam_name() -> AttributeType {
    AttributeType::Custom {
        name: "IamName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| matches(&IAM_NAME, "IAM name", value),
    }
}

pub fn group_name() -> AttributeType {
    AttributeType::Custom {
        name: "SecurityGroupName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| {
            if let Value::String(s) = value
                && s.starts_with("sg-")
            {
                return Err("Security group names cannot start with 'sg-'".to_string());
            }
            matches(&GROUP_NAME, "security group name", value)
        },
    }
}

pub fn cluster_name() -> AttributeType {
    AttributeType::Custom {
        name: "ClusterName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| matches(&CLUSTER_NAME, "cluster or service name", value),
    }
}

pub fn arn() -> AttributeType {
    AttributeType::Custom {
        name: "Arn".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| matches(&ARN, "ARN", value),
    }
}

pub fn image() -> AttributeType {
    AttributeType::Custom {
        name: "Image".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| matches(&IMAGE, "container image reference", value),
    }
}

pub fn non_negative_int() -> AttributeType {
    AttributeType::Custom {
        name: "NonNegativeInt".to_string(),
        base: Box::new(AttributeType::Int),
        validate: |value| match value {
            Value::Int(n) if *n >= 0 => Ok(()),
            Value::Int(_) => Err("Value must not be negative".to_string()),
            _ => Err("Expected integer".to_string()),
        },
    }
}

/// Application protocols for target groups and listeners
pub fn lb_protocol() -> AttributeType {
    AttributeType::Enum(vec![
        "HTTP".to_string(),
        "HTTPS".to_string(),
        "TCP".to_string(),
    ])
}

/// A security group rule: `{ protocol = "tcp", ports = "80" | "8000-8080", cidr = "0.0.0.0/0" }`
pub fn security_rule() -> AttributeType {
    AttributeType::Custom {
        name: "SecurityRule".to_string(),
        base: Box::new(AttributeType::Map(Box::new(AttributeType::String))),
        validate: |value| {
            let Value::Map(rule) = value else {
                return Err("Expected map".to_string());
            };
            for key in rule.keys() {
                if !["protocol", "ports", "cidr"].contains(&key.as_str()) {
                    return Err(format!("Unknown rule field '{}'", key));
                }
            }

            let protocol = rule.get("protocol").and_then(Value::as_str).unwrap_or("tcp");
            if !["tcp", "udp", "icmp", "all"].contains(&protocol) {
                return Err(format!("Unknown protocol '{}'", protocol));
            }
            if let Some(ports) = rule.get("ports").and_then(Value::as_str) {
                validate_port_range(ports)?;
            } else if protocol != "all" {
                return Err("Rule needs 'ports' unless protocol is 'all'".to_string());
            }
            let cidr = rule
                .get("cidr")
                .and_then(Value::as_str)
                .ok_or_else(|| "Rule needs 'cidr'".to_string())?;
            strata_core::schema::validate_cidr(cidr)
        },
    }
}

fn validate_port_range(ports: &str) -> Result<(), String> {
    let parse = |p: &str| {
        p.trim()
            .parse::<u16>()
            .map_err(|_| format!("Invalid port '{}'", p))
    };
    let (from, to) = match ports.split_once('-') {
        Some((from, to)) => (parse(from)?, parse(to)?),
        None => {
            let port = parse(ports)?;
            (port, port)
        }
    };
    if from > to {
        return Err(format!("Port range '{}' is reversed", ports));
    }
    Ok(())
}
