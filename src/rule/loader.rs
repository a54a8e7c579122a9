//! 探测文件规则加载器
//! 解析 Nmap service-probes 风格的行式文本，转换为内部规则模型
//!
//! 支持的指令（空行与 `#` 开头的注释行忽略）：
//! - `Probe <transport> <name> ...`：记录当前探测上下文
//! - `match <service> m<d><regex><d>[flags] [version-info]`：强匹配规则
//! - `softmatch <service> m<d><regex><d>[flags] [version-info]`：弱匹配规则，置信度打折
//!
//! 单行格式错误只跳过该行并记录诊断，不会导致整个文件失败

use std::io::BufRead;
use serde::Serialize;
use crate::logging::{debug, info, trace, warn};

use super::model::Rule;
use crate::config::ImportOptions;
use crate::error::{ImportParseError, RsbResult};

/// 探测文件解析结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// 成功构建的规则（按文件顺序）
    pub rules: Vec<Rule>,
    /// 被跳过的格式错误行
    pub skipped: Vec<ImportParseError>,
    /// 规则已保留，但 version-info 部分解析不完整的行
    pub warnings: Vec<ImportParseError>,
    /// 出现过的探测名称
    pub probes: Vec<String>,
    /// 不认识的指令行数量（ports/rarity/Exclude 等）
    pub ignored_lines: usize,
    /// 读取的总行数
    pub lines_read: usize,
}

impl ImportReport {
    /// 是否没有任何被跳过的行
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// 探测文件规则加载器
#[derive(Debug, Clone, Default)]
pub struct ProbeFileLoader {
    options: ImportOptions,
}

impl ProbeFileLoader {
    pub fn new(options: ImportOptions) -> Self {
        Self { options }
    }

    /// 从任意读取源解析探测文件
    /// 仅读取失败（IO错误）会作为错误返回；非UTF-8字节按替换字符处理
    pub fn parse<R: BufRead>(&self, mut reader: R) -> RsbResult<ImportReport> {
        let mut state = ParseState::new(self.options);
        let mut buf = Vec::new();
        let mut line_no = 0;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = String::from_utf8_lossy(&buf);
            state.feed_line(line_no, &line);
        }

        Ok(state.finish())
    }

    /// 从内存字符串解析探测文件
    pub fn parse_str(&self, source: &str) -> ImportReport {
        let mut state = ParseState::new(self.options);
        for (idx, line) in source.lines().enumerate() {
            state.feed_line(idx + 1, line);
        }
        state.finish()
    }
}

/// 解析过程中的状态
struct ParseState {
    options: ImportOptions,
    report: ImportReport,
    current_probe: Option<String>,
}

impl ParseState {
    fn new(options: ImportOptions) -> Self {
        Self {
            options,
            report: ImportReport::default(),
            current_probe: None,
        }
    }

    fn feed_line(&mut self, line_no: usize, raw_line: &str) {
        self.report.lines_read += 1;

        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        let (directive, rest) = split_word(line);
        let result = match directive {
            "Probe" => self.parse_probe(rest),
            "match" => self.parse_match(line_no, line, rest, false),
            "softmatch" => self.parse_match(line_no, line, rest, true),
            _ => {
                trace!("Ignoring directive {:?} on line {}", directive, line_no);
                self.report.ignored_lines += 1;
                Ok(())
            }
        };

        if let Err(reason) = result {
            warn!("Probe file line {} skipped: {}", line_no, reason);
            self.report.skipped.push(ImportParseError {
                line_no,
                line: line.to_string(),
                reason,
            });
        }
    }

    /// 解析 Probe 指令：`Probe TCP GetRequest q|GET / HTTP/1.0\r\n\r\n|`
    fn parse_probe(&mut self, rest: &str) -> Result<(), String> {
        let mut fields = rest.split_whitespace();
        let (Some(transport), Some(name)) = (fields.next(), fields.next()) else {
            return Err("Probe line needs a transport and a name".to_string());
        };
        if !matches!(transport, "TCP" | "UDP") {
            return Err(format!("unknown probe transport `{}`", transport));
        }

        debug!("Probe context: {} {}", transport, name);
        self.current_probe = Some(name.to_string());
        self.report.probes.push(name.to_string());
        Ok(())
    }

    /// 解析 match/softmatch 指令
    fn parse_match(&mut self, line_no: usize, line: &str, rest: &str, soft: bool) -> Result<(), String> {
        let (service, rest) = split_word(rest);
        if service.is_empty() {
            return Err("missing service name".to_string());
        }
        if rest.is_empty() {
            return Err("missing pattern".to_string());
        }

        let (body, version_info) = split_pattern(rest)?;
        let pattern = unescape_pattern(body);

        let (id, confidence) = if soft {
            (format!("nmap_soft_{}", self.report.rules.len() + 1), self.options.softmatch_confidence())
        } else {
            (format!("nmap_{}", self.report.rules.len() + 1), self.options.hard_confidence())
        };

        let description = match &self.current_probe {
            Some(probe) => format!("Nmap {} detection (probe {})", service, probe),
            None => format!("Nmap {} detection", service),
        };

        let mut rule = Rule {
            id,
            service: service.to_string(),
            pattern,
            confidence,
            description,
            author: "nmap".to_string(),
            ..Default::default()
        };

        if let Err(reason) = parse_version_info(&mut rule, version_info) {
            warn!("Probe file line {}: version info incomplete: {}", line_no, reason);
            self.report.warnings.push(ImportParseError {
                line_no,
                line: line.to_string(),
                reason,
            });
        }

        self.report.rules.push(rule);
        Ok(())
    }

    fn finish(self) -> ImportReport {
        info!(
            "Probe file parsed: {} rules, {} probes, {} skipped lines, {} ignored lines",
            self.report.rules.len(),
            self.report.probes.len(),
            self.report.skipped.len(),
            self.report.ignored_lines
        );
        self.report
    }
}

/// 拆出第一个空白分隔的单词，返回（单词，去掉前导空白的剩余部分）
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// 解析 `m<d><body><d>[flags]`，返回（正则主体，剩余的 version-info）
/// 结束分隔符为正文中第一次出现的分隔符，正文可以包含空白；flags 暂不生效
fn split_pattern(s: &str) -> Result<(&str, &str), String> {
    let Some(after_m) = s.strip_prefix('m') else {
        return Err("pattern must start with `m`".to_string());
    };
    let Some(delim) = after_m.chars().next() else {
        return Err("missing pattern delimiter".to_string());
    };
    if delim.is_whitespace() || delim.is_ascii_alphanumeric() {
        return Err(format!("invalid pattern delimiter {:?}", delim));
    }

    let body_and_tail = &after_m[delim.len_utf8()..];
    let Some(end) = body_and_tail.find(delim) else {
        return Err(format!("unterminated pattern, missing closing `{}`", delim));
    };
    let body = &body_and_tail[..end];
    if body.is_empty() {
        return Err("empty pattern".to_string());
    }

    let tail = &body_and_tail[end + delim.len_utf8()..];
    let flags_len = tail.find(char::is_whitespace).unwrap_or(tail.len());
    if flags_len > 0 {
        trace!("Ignoring pattern flags {:?}", &tail[..flags_len]);
    }

    Ok((body, tail[flags_len..].trim_start()))
}

/// 正则主体反转义
/// - `\r` `\n` `\t` `\0` 转为对应控制字符
/// - `\\` 转为字面反斜杠
/// - `\xHH` 转为字节 HH 对应的字面字符
///
/// 由转义产生的字面字符若是正则元字符会重新转义，保证其仍按字面匹配；
/// 其余转义（`\d`、`\s`、`\.` 等）原样交给正则引擎
pub fn unescape_pattern(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('0') => {
                chars.next();
                out.push('\0');
            }
            Some('\\') => {
                chars.next();
                push_literal_byte(&mut out, b'\\');
            }
            Some('x') => {
                let mut lookahead = chars.clone();
                lookahead.next();
                let hex: String = lookahead.by_ref().take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
                        chars = lookahead;
                        push_literal_byte(&mut out, byte);
                    }
                    // 非法的 \x 序列原样保留，由正则编译阶段给出诊断
                    _ => out.push('\\'),
                }
            }
            _ => out.push('\\'),
        }
    }

    out
}

/// 写入一个按字面匹配的字节
fn push_literal_byte(out: &mut String, byte: u8) {
    if byte.is_ascii() {
        out.push_str(&regex::escape(&char::from(byte).to_string()));
    } else {
        // 非ASCII字节以码位 U+00HH 参与匹配
        out.push_str(&format!("\\x{:02X}", byte));
    }
}

/// 解析 version-info：`p/product/ v/version/ i/info/ h/host/ o/os/ d/device/ cpe:/a:vendor:product/`
/// 不认识的字段忽略；字段未闭合时停止解析并返回原因（已解析的字段保留）
fn parse_version_info(rule: &mut Rule, info: &str) -> Result<(), String> {
    let mut rest = info.trim_start();

    while !rest.is_empty() {
        let name_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let (mut name, mut after) = rest.split_at(name_len);
        if let Some(stripped) = after.strip_prefix(':') {
            name = &rest[..name_len + 1];
            after = stripped;
        }
        if name.is_empty() {
            return Err(format!("unexpected text in version info: {:?}", rest));
        }

        let Some(delim) = after.chars().next().filter(|c| !c.is_whitespace()) else {
            return Err(format!("field `{}` has no value", name));
        };
        let body = &after[delim.len_utf8()..];
        let Some(end) = body.find(delim) else {
            return Err(format!("unterminated `{}` field", name));
        };
        let value = &body[..end];

        match name {
            "p" => rule.product = value.to_string(),
            "v" => rule.version = value.to_string(),
            "i" => rule.info = value.to_string(),
            "h" => rule.hostname = value.to_string(),
            "o" => rule.os = value.to_string(),
            "d" => rule.device_type = value.to_string(),
            "cpe:" if rule.cpe.is_empty() => rule.cpe = format!("cpe:/{}", value),
            other => trace!("Ignoring version info field {:?}", other),
        }

        let tail = &body[end + delim.len_utf8()..];
        let flags_len = tail.find(char::is_whitespace).unwrap_or(tail.len());
        rest = tail[flags_len..].trim_start();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;

    const OPENSSH_LINE: &str = r"match ssh m|SSH-([.\d]+)-OpenSSH[_\s]+(\S+)| p/OpenSSH/ v/$2/";

    #[test]
    fn test_parse_match_line() {
        let report = ProbeFileLoader::default().parse_str(OPENSSH_LINE);
        assert!(report.is_clean());
        assert_eq!(report.rules.len(), 1);

        let rule = &report.rules[0];
        assert_eq!(rule.id, "nmap_1");
        assert_eq!(rule.service, "ssh");
        assert_eq!(rule.pattern, r"SSH-([.\d]+)-OpenSSH[_\s]+(\S+)");
        assert_eq!(rule.product, "OpenSSH");
        assert_eq!(rule.version, "$2");
        assert_eq!(rule.confidence, ImportOptions::default().hard_confidence());
        assert_eq!(rule.author, "nmap");
    }

    #[test]
    fn test_parse_softmatch_line_applies_penalty() {
        let line = OPENSSH_LINE.replacen("match", "softmatch", 1);
        let options = ImportOptions::default();
        let report = ProbeFileLoader::new(options).parse_str(&line);

        let rule = &report.rules[0];
        assert_eq!(rule.id, "nmap_soft_1");
        assert_eq!(
            rule.confidence,
            (options.hard_match_confidence - options.softmatch_penalty).max(options.softmatch_floor)
        );
        assert_eq!(rule.confidence, 65);

        let floored = ImportOptions { hard_match_confidence: 60, softmatch_penalty: 20, softmatch_floor: 50 };
        let report = ProbeFileLoader::new(floored).parse_str(&line);
        assert_eq!(report.rules[0].confidence, 50);
    }

    #[test]
    fn test_parse_full_file_with_context_and_bad_lines() {
        let source = "\
# Nmap service probes excerpt

Probe TCP NULL q||
totalwaitms 6000
match ftp m/^220.*vsftpd ([-.\\w]+)/ p/vsftpd/ v/$1/ o/Unix/
softmatch ftp m|^220 .*FTP|i
match broken m|unterminated
match onlyservice
Probe TCP
match http m=^HTTP/1\\.[01] \\d\\d\\d .*\\r\\nServer: nginx/([\\d.]+)=s p/nginx/ v/$1/ cpe:/a:igor_sysoev:nginx:$1/
";
        let report = ProbeFileLoader::default().parse_str(source);

        assert_eq!(report.lines_read, 10);
        assert_eq!(report.rules.len(), 3);
        assert_eq!(report.probes, vec!["NULL".to_string()]);
        assert_eq!(report.ignored_lines, 1);

        let skipped: Vec<usize> = report.skipped.iter().map(|e| e.line_no).collect();
        assert_eq!(skipped, vec![7, 8, 9]);

        let ftp = &report.rules[0];
        assert_eq!(ftp.os, "Unix");
        assert!(ftp.description.contains("probe NULL"));

        // 正文可以包含空白，flags 被忽略
        let soft = &report.rules[1];
        assert_eq!(soft.id, "nmap_soft_2");
        assert_eq!(soft.pattern, "^220 .*FTP");

        let http = &report.rules[2];
        assert_eq!(http.id, "nmap_3");
        assert_eq!(http.cpe, "cpe:/a:igor_sysoev:nginx:$1");
        assert!(http.pattern.contains("\r\nServer"));
        assert!(RuleCompiler::compile_pattern(&http.pattern).is_ok());
    }

    #[test]
    fn test_parse_from_reader_with_invalid_utf8() {
        let mut bytes = b"match raw m|^\\x01\\x02| p/Raw/\n".to_vec();
        bytes.extend_from_slice(b"# comment \xff\xfe\n");
        let report = ProbeFileLoader::default().parse(bytes.as_slice()).unwrap();
        assert_eq!(report.rules.len(), 1);
        assert_eq!(report.lines_read, 2);
    }

    #[test]
    fn test_unescape_control_and_hex() {
        assert_eq!(unescape_pattern(r"\r\n\t\0"), "\r\n\t\0");
        assert_eq!(unescape_pattern(r"\x41\x42C"), "ABC");
        // 由转义得到的元字符仍按字面匹配
        assert_eq!(unescape_pattern(r"\x2e"), r"\.");
        assert_eq!(unescape_pattern(r"a\\b"), r"a\\b");
        // 正则自身的转义原样保留
        assert_eq!(unescape_pattern(r"\d+\s\."), r"\d+\s\.");
        // 非法的 \x 序列保持不变
        assert_eq!(unescape_pattern(r"\xZZ"), r"\xZZ");
        assert_eq!(unescape_pattern(r"\xFF"), r"\xFF");
    }

    #[test]
    fn test_unescaped_pattern_matches_literals() {
        let pattern = unescape_pattern(r"^\x00\x01a\\b\r\n");
        let matcher = RuleCompiler::compile_pattern(&pattern).unwrap();
        assert!(matcher.is_match("\u{0}\u{1}a\\b\r\n"));
        assert!(!matcher.is_match("\u{0}\u{1}ab\r\n"));
    }

    #[test]
    fn test_version_info_unknown_and_unterminated_fields() {
        let mut rule = Rule::default();
        assert!(parse_version_info(&mut rule, "p/Foo/ x/ignored/ h|host| d/router/").is_ok());
        assert_eq!(rule.product, "Foo");
        assert_eq!(rule.hostname, "host");
        assert_eq!(rule.device_type, "router");

        let report = ProbeFileLoader::default().parse_str("match svc m|^X| p/Bar/ v/1.0");
        assert_eq!(report.rules.len(), 1);
        assert_eq!(report.rules[0].product, "Bar");
        assert!(report.rules[0].version.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }
}
