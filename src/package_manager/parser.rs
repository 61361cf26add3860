//! 输入解析：包列表、`name[:command]` 条目、命令模板

use super::types::PackageSpec;
use crate::error::ConfigError;
use std::path::Path;

/// 模板中的包名占位符
pub const NAME_PLACEHOLDER: &str = "{name}";

/// 清理终端输出中的 ANSI 转义序列和控制字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            c if c.is_control() && c != '\t' => {}
            _ => result.push(c),
        }
    }

    result
}

/// 包名允许的字符：首字符为字母数字，其余为字母数字或 `._+-@/=`
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-' | '@' | '/' | '=')
}

/// 校验包名，拒绝任何可能在命令行中被解释的字符
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => {
            return Err(ConfigError::EmptyName {
                entry: name.to_string(),
            })
        }
    };
    if !first.is_ascii_alphanumeric() {
        return Err(ConfigError::UnsafeName {
            name: name.to_string(),
            ch: first,
        });
    }
    if let Some(ch) = chars.find(|c| !is_name_char(*c)) {
        return Err(ConfigError::UnsafeName {
            name: name.to_string(),
            ch,
        });
    }
    Ok(())
}

/// 解析单个条目 `name[:command]`，在第一个 `:` 处分割
pub fn parse_entry(raw: &str) -> Result<PackageSpec, ConfigError> {
    let (name, command) = match raw.split_once(':') {
        Some((name, command)) => (name.trim(), Some(command.trim())),
        None => (raw.trim(), None),
    };

    if name.is_empty() {
        return Err(ConfigError::EmptyName {
            entry: raw.to_string(),
        });
    }
    validate_name(name)?;

    match command {
        Some("") => Err(ConfigError::EmptyCommand {
            name: name.to_string(),
        }),
        Some(command) => Ok(PackageSpec::with_command(name, command)),
        None => Ok(PackageSpec::new(name)),
    }
}

/// 解析包列表文本：每行一个条目，忽略空行和 `#` 注释行
pub fn parse_list(content: &str, path: &Path) -> Result<Vec<PackageSpec>, ConfigError> {
    let mut specs = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let spec = parse_entry(trimmed).map_err(|e| ConfigError::ListEntry {
            path: path.to_path_buf(),
            line: idx + 1,
            source: Box::new(e),
        })?;
        specs.push(spec);
    }
    Ok(specs)
}

/// 读取包列表文件，`-` 表示标准输入
pub fn read_list_file(path: &Path) -> Result<Vec<PackageSpec>, ConfigError> {
    let read = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(path)
    };
    let content = read.map_err(|source| ConfigError::ListFile {
        path: path.to_path_buf(),
        source,
    })?;
    parse_list(&content, path)
}

/// 汇总所有输入：先列表文件（按文件顺序），再命令行参数
pub fn collect_specs<P: AsRef<Path>>(
    files: &[P],
    args: &[String],
) -> Result<Vec<PackageSpec>, ConfigError> {
    let mut specs = Vec::new();
    for file in files {
        specs.extend(read_list_file(file.as_ref())?);
    }
    for arg in args {
        specs.push(parse_entry(arg)?);
    }

    let mut seen = std::collections::HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.name.as_str()) {
            log::warn!("包 {} 在输入中出现多次，将重复执行", spec.name);
        }
    }

    Ok(specs)
}

/// 将命令拆分为参数向量（不经过 shell）
///
/// 支持空白分隔、单引号原样、双引号内 `\"` `\\` `\$` `` \` `` 转义、引号外反斜杠转义。
pub fn split_command(command: &str) -> Result<Vec<String>, ConfigError> {
    let unterminated = || ConfigError::UnterminatedQuote {
        command: command.to_string(),
    };

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unterminated()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unterminated()),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unterminated()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                current.push(chars.next().unwrap_or('\\'));
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }

    Ok(words)
}

/// 已拆分的命令模板，`{name}` 在各参数内部替换
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
    tokens: Vec<String>,
}

impl CommandTemplate {
    /// 解析默认安装模板，必须包含 `{name}`
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let tokens = split_command(template)?;
        if !tokens.iter().any(|t| t.contains(NAME_PLACEHOLDER)) {
            return Err(ConfigError::TemplateMissingPlaceholder {
                template: template.to_string(),
            });
        }
        Ok(Self {
            raw: template.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn render(&self, name: &str) -> Vec<String> {
        substitute(&self.tokens, name)
    }
}

fn substitute(tokens: &[String], name: &str) -> Vec<String> {
    tokens
        .iter()
        .map(|t| t.replace(NAME_PLACEHOLDER, name))
        .collect()
}

/// 计算某个包实际执行的参数向量：自定义命令优先，否则使用默认模板
pub fn resolve_argv(
    spec: &PackageSpec,
    template: &CommandTemplate,
) -> Result<Vec<String>, ConfigError> {
    match &spec.install_command {
        Some(command) => {
            let tokens = split_command(command)?;
            if tokens.is_empty() {
                return Err(ConfigError::EmptyCommand {
                    name: spec.name.clone(),
                });
            }
            Ok(substitute(&tokens, &spec.name))
        }
        None => Ok(template.render(&spec.name)),
    }
}
