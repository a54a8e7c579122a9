//! 内置常见服务规则

use once_cell::sync::Lazy;

use super::model::Rule;

fn builtin(id: &str, service: &str, pattern: &str, product: &str, confidence: u8, description: &str) -> Rule {
    Rule {
        id: id.to_string(),
        service: service.to_string(),
        pattern: pattern.to_string(),
        product: product.to_string(),
        confidence,
        description: description.to_string(),
        author: "builtin".to_string(),
        ..Default::default()
    }
}

static BUILTIN_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        builtin("nginx", "http", r"(?i)nginx[/\s]+(\d+\.\d+\.\d+)", "nginx", 90, "Nginx Web Server")
            .with_version("$1"),
        builtin("apache", "http", r"(?i)Apache[/\s]+(\d+\.\d+\.\d+)", "Apache httpd", 90, "Apache HTTP Server")
            .with_version("$1"),
        builtin("openssh", "ssh", r"SSH-([.\d]+)-OpenSSH[_\s]+(\S+)", "OpenSSH", 95, "OpenSSH Server")
            .with_version("$2")
            .with_info("protocol $1"),
        builtin("mysql", "mysql", r"(\d+\.\d+\.\d+).*mysql", "MySQL", 90, "MySQL Database Server")
            .with_version("$1"),
        builtin("ftp_vsftpd", "ftp", r"220.*vsftpd\s+(\S+)", "vsftpd", 95, "vsftpd FTP Server")
            .with_version("$1"),
        builtin("smtp_postfix", "smtp", r"220.*Postfix", "Postfix", 85, "Postfix SMTP Server"),
        builtin("redis", "redis", r"\+PONG\r?\n", "Redis", 95, "Redis Key-Value Store"),
        builtin("iis", "http", r"Microsoft-IIS[/\s]+(\d+\.\d+)", "Microsoft IIS httpd", 90, "Microsoft IIS Web Server")
            .with_version("$1"),
    ]
});

/// 获取内置规则副本
pub fn builtin_rules() -> Vec<Rule> {
    BUILTIN_RULES.clone()
}
