//! Command templates for the external table tool: tokenizing, locating the single output
//! path, per-split output rewriting and input binding.

use std::path::{Path, PathBuf};

use which::which;

use crate::config::defs::{PipelineError, SPLIT_TAG};
use crate::utils::file::{absolutize, extension_remover};

/// Where the output path sits in the argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OutputToken {
    /// `FLAG PATH`: the path is its own token.
    Separate,
    /// `--flag=PATH`: the path follows the given prefix inside one token.
    Inline(String),
}

/// A parsed command: program, ordered arguments, and the index of the output-path argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
    output_index: usize,
    output_token: OutputToken,
    placeholder: String,
}

impl CommandTemplate {
    /// Parses a command string using shell word rules (no shell is involved at run time).
    ///
    /// # Arguments
    ///
    /// * `command` - e.g. `humann_regroup_table -i {input} -g uniref90_rxn -o out.biom`.
    /// * `output_flags` - Flags that introduce the output path.
    /// * `placeholder` - Text standing for the batch input path.
    ///
    /// # Returns
    /// Result<CommandTemplate, PipelineError>. Fails unless exactly one output path and at
    /// least one input placeholder are present.
    pub fn parse(command: &str, output_flags: &[String], placeholder: &str) -> Result<Self, PipelineError> {
        let tokens = shlex::split(command).ok_or_else(|| {
            PipelineError::InvalidTemplate(format!("Cannot tokenize command (unbalanced quotes?): {}", command))
        })?;
        Self::from_tokens(tokens, output_flags, placeholder)
    }

    /// Same as `parse` for an already tokenized command.
    pub fn from_tokens(tokens: Vec<String>, output_flags: &[String], placeholder: &str) -> Result<Self, PipelineError> {
        if placeholder.is_empty() {
            return Err(PipelineError::InvalidTemplate("Input placeholder must not be empty".to_string()));
        }
        let mut tokens = tokens.into_iter();
        let program = tokens
            .next()
            .ok_or_else(|| PipelineError::InvalidTemplate("Command is empty".to_string()))?;
        let args: Vec<String> = tokens.collect();

        let mut found: Vec<(usize, OutputToken)> = Vec::new();
        let mut dangling = 0usize;
        for (i, arg) in args.iter().enumerate() {
            for flag in output_flags {
                if arg == flag {
                    if i + 1 < args.len() {
                        found.push((i + 1, OutputToken::Separate));
                    } else {
                        dangling += 1;
                    }
                } else if flag.starts_with("--") && arg.starts_with(&format!("{}=", flag)) {
                    found.push((i, OutputToken::Inline(format!("{}=", flag))));
                }
            }
        }

        if found.len() != 1 || dangling > 0 {
            return Err(PipelineError::AmbiguousOutput {
                flags: output_flags.join(", "),
                found: found.len() + dangling,
            });
        }
        let (output_index, output_token) = found.remove(0);

        let template = CommandTemplate {
            program,
            args,
            output_index,
            output_token,
            placeholder: placeholder.to_string(),
        };

        if template.output_path().as_os_str().is_empty() {
            return Err(PipelineError::InvalidTemplate("Output path in command is empty".to_string()));
        }
        if template.output_value().contains(placeholder) {
            return Err(PipelineError::InvalidTemplate(format!(
                "Output path '{}' must not contain the input placeholder",
                template.output_value()
            )));
        }
        let has_input = template
            .args
            .iter()
            .enumerate()
            .any(|(i, a)| i != template.output_index && a.contains(placeholder));
        if !has_input {
            return Err(PipelineError::MissingInputPlaceholder(placeholder.to_string()));
        }
        Ok(template)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn output_value(&self) -> &str {
        let token = &self.args[self.output_index];
        match &self.output_token {
            OutputToken::Separate => token.as_str(),
            OutputToken::Inline(prefix) => &token[prefix.len()..],
        }
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(self.output_value())
    }

    fn with_output(&self, path: &Path) -> Self {
        let mut template = self.clone();
        let value = path.to_string_lossy();
        template.args[self.output_index] = match &self.output_token {
            OutputToken::Separate => value.into_owned(),
            OutputToken::Inline(prefix) => format!("{}{}", prefix, value),
        };
        template
    }

    /// Anchors a relative output path at `cwd`, since commands run inside per-batch directories.
    pub fn resolve_output(&self, cwd: &Path) -> Self {
        let output = self.output_path();
        if output.is_absolute() {
            return self.clone();
        }
        self.with_output(&absolutize(&output, cwd))
    }

    /// Template for one split: the output path gains `_split_{split_id}` before its extension.
    /// Every other token is unchanged.
    pub fn for_split(&self, split_id: usize) -> Self {
        self.with_output(&split_output_path(&self.output_path(), split_id))
    }

    /// Argument list with every placeholder replaced by the batch input path.
    pub fn bind_input(&self, input: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(&self.placeholder, &input))
            .collect()
    }

    /// Fails if the program cannot be found on `$PATH` (or at the given path).
    pub fn check_program(&self) -> Result<PathBuf, PipelineError> {
        which(&self.program).map_err(|e| PipelineError::ToolExecution {
            tool: self.program.clone(),
            error: format!("required program not found in $PATH: {}", e),
        })
    }

    /// Printable form for logs.
    pub fn display(&self) -> String {
        let mut words = vec![self.program.as_str()];
        words.extend(self.args.iter().map(String::as_str));
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }
}


/// Inserts `_split_{split_id}` before the extension of a path; compression suffixes stay outermost.
///
/// `out.biom` -> `out_split_3.biom`, `out.tsv.gz` -> `out_split_3.tsv.gz`, `out` -> `out_split_3`.
pub fn split_output_path(path: &Path, split_id: usize) -> PathBuf {
    let (stem, extensions) = extension_remover(path);
    let mut name = stem
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!("_{}_{}", SPLIT_TAG, split_id));
    for ext in &extensions {
        name.push('.');
        name.push_str(ext);
    }
    stem.with_file_name(name)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> Vec<String> {
        vec!["-o".to_string(), "--output".to_string()]
    }

    #[test]
    fn test_split_output_path() {
        assert_eq!(split_output_path(Path::new("out.biom"), 3), PathBuf::from("out_split_3.biom"));
        assert_eq!(split_output_path(Path::new("/r/out.tsv.gz"), 0), PathBuf::from("/r/out_split_0.tsv.gz"));
        assert_eq!(split_output_path(Path::new("dir/out"), 12), PathBuf::from("dir/out_split_12"));
    }

    #[test]
    fn test_inline_output_flag() {
        let t = CommandTemplate::parse("tool --in={input} --output=res.biom", &flags(), "{input}").unwrap();
        assert_eq!(t.output_path(), PathBuf::from("res.biom"));
        assert_eq!(t.for_split(2).args(), &["--in={input}".to_string(), "--output=res_split_2.biom".to_string()]);
    }

    #[test]
    fn test_dangling_flag_is_ambiguous() {
        let err = CommandTemplate::parse("tool -i {input} -o", &flags(), "{input}").unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousOutput { found: 1, .. }));
    }

    #[test]
    fn test_malformed_templates_exit_as_template_errors() {
        for (command, placeholder) in [
            ("tool -i {input} -o 'out.biom", "{input}"),
            ("tool -i {input} -o {input}.biom", "{input}"),
            ("tool -i {input} --output=", "{input}"),
            ("", "{input}"),
            ("tool -i {input} -o out.biom", ""),
        ] {
            let err = CommandTemplate::parse(command, &flags(), placeholder).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidTemplate(_)), "{}: {:?}", command, err);
            assert_eq!(err.exit_code(), 3);
        }
    }
}
