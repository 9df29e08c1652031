//! The decoded command specification and the decoder that produces it.

use crate::{
    error::{Error, Result},
    protocol::Term,
};

/// Where a child's stdout or stderr stream should go.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Redirect
{
    /// Discard the stream (`/dev/null`).
    Null,
    /// Append to a named file, creating it if necessary.
    File(String),
    /// Redirect onto the other standard stream.
    ToOther,
}

/// A fully validated, immutable request to run one command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec
{
    /// Identifies this request to the caller; echoed back in responses.
    pub transaction_id: i64,
    /// Absolute path, `./`-relative path, bare name, or `#!`-prefixed
    /// script body.
    pub command: String,
    /// Working directory to `chdir` into before `exec`. Empty means the
    /// sandbox builder's confinement directory should be used.
    pub cd: String,
    /// Extra `KEY=VALUE` environment entries, appended to the defaults.
    pub env: Vec<String>,
    /// Overrides the command used to signal this child for termination.
    pub kill: Option<String>,
    /// `setpriority` value in `[-20, 20]`.
    pub nice: Option<i32>,
    /// A named identity whose uid replaces the randomly generated one.
    pub user: Option<String>,
    /// stdout redirection.
    pub stdout: Redirect,
    /// stderr redirection.
    pub stderr: Redirect,
    /// Hook run synchronously before the main command; non-zero exit
    /// aborts the launch.
    pub before: Option<String>,
    /// Hook run synchronously after the main command exits.
    pub after: Option<String>,
    /// `RLIMIT_NOFILE` to apply to the child, if given.
    pub nofiles: Option<u64>,
}

impl CommandSpec
{
    /// Whether `stdout` and `stderr` redirect into each other, which
    /// would otherwise form a cycle duplicating nothing useful.
    pub fn has_redirect_cycle(&self) -> bool
    {
        matches!((&self.stdout, &self.stderr), (Redirect::ToOther, Redirect::ToOther))
    }
}

/// Decodes wire [`Term`]s into [`CommandSpec`]s.
pub struct SpecDecoder;

impl SpecDecoder
{
    /// Decode a full request term: `{transaction_id, {command, [options]}}`.
    pub fn decode(term: &Term) -> Result<CommandSpec>
    {
        Self::decode_inner(term).map_err(|e| {
            let transaction_id = term.as_tuple().and_then(|xs| xs.first()).and_then(Term::as_int);
            log::warn!("rejected request {transaction_id:?}: {e}");
            e
        })
    }

    fn decode_inner(term: &Term) -> Result<CommandSpec>
    {
        let top = term.as_tuple()
            .filter(|xs| xs.len() == 2)
            .ok_or_else(|| Error::BadRequest("expected a 2-tuple request".to_owned()))?;

        let transaction_id = top[0].as_int()
            .ok_or_else(|| Error::BadRequest("transaction id must be an integer".to_owned()))?;

        let body = top[1].as_tuple()
            .filter(|xs| xs.len() == 2)
            .ok_or_else(|| Error::BadRequest("expected {command, options}".to_owned()))?;

        let command = body[0].as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::BadRequest("missing command".to_owned()))?
            .to_owned();

        let options = body[1].as_list()
            .ok_or_else(|| Error::BadRequest("options must be a list".to_owned()))?;

        let mut spec = CommandSpec{
            transaction_id,
            command,
            cd: String::new(),
            env: Vec::new(),
            kill: None,
            nice: None,
            user: None,
            stdout: Redirect::Null,
            stderr: Redirect::Null,
            before: None,
            after: None,
            nofiles: None,
        };

        for option in options {
            Self::apply_option(&mut spec, option)?;
        }

        if spec.has_redirect_cycle() {
            return Err(Error::BadRequest(
                "stdout and stderr cannot both redirect to each other".to_owned(),
            ));
        }

        Ok(spec)
    }

    fn apply_option(spec: &mut CommandSpec, option: &Term) -> Result<()>
    {
        let pair = option.as_tuple()
            .filter(|xs| xs.len() == 2)
            .ok_or_else(|| Error::BadRequest("expected {option, value} pair".to_owned()))?;

        let key = pair[0].as_atom()
            .ok_or_else(|| Error::BadRequest("option key must be an atom".to_owned()))?;

        match key {
            "cd" => {
                spec.cd = Self::expect_str(&pair[1], "cd")?.to_owned();
            },
            "env" => {
                let entries = pair[1].as_list()
                    .ok_or_else(|| Error::BadRequest("env must be a list".to_owned()))?;
                spec.env = entries.iter()
                    .map(|e| Self::expect_str(e, "env").map(str::to_owned))
                    .collect::<Result<_>>()?;
            },
            "kill" => spec.kill = Some(Self::expect_str(&pair[1], "kill")?.to_owned()),
            "nice" => {
                let n = pair[1].as_int()
                    .ok_or_else(|| Error::BadRequest("nice must be an integer".to_owned()))?;
                if !(-20 ..= 20).contains(&n) {
                    return Err(Error::BadRequest(format!("nice {n} out of range [-20, 20]")));
                }
                spec.nice = Some(n as i32);
            },
            "user" => spec.user = Some(Self::expect_str(&pair[1], "user")?.to_owned()),
            "stdout" => spec.stdout = Self::decode_redirect(&pair[1])?,
            "stderr" => spec.stderr = Self::decode_redirect(&pair[1])?,
            "before" => spec.before = Some(Self::expect_str(&pair[1], "before")?.to_owned()),
            "after" => spec.after = Some(Self::expect_str(&pair[1], "after")?.to_owned()),
            "nofiles" => {
                let n = pair[1].as_int()
                    .ok_or_else(|| Error::BadRequest("nofiles must be an integer".to_owned()))?;
                if n < 0 {
                    return Err(Error::BadRequest("nofiles cannot be negative".to_owned()));
                }
                spec.nofiles = Some(n as u64);
            },
            "mount" => return Err(Error::Reserved("mount")),
            other => return Err(Error::BadRequest(format!("unknown option {other}"))),
        }

        Ok(())
    }

    fn decode_redirect(term: &Term) -> Result<Redirect>
    {
        match term {
            Term::Atom(a) if a == "null"   => Ok(Redirect::Null),
            Term::Atom(a) if a == "stdout" => Ok(Redirect::ToOther),
            Term::Atom(a) if a == "stderr" => Ok(Redirect::ToOther),
            Term::Str(path)                => Ok(Redirect::File(path.clone())),
            _ => Err(Error::BadRequest("invalid redirect target".to_owned())),
        }
    }

    fn expect_str<'a>(term: &'a Term, field: &str) -> Result<&'a str>
    {
        term.as_str().ok_or_else(|| Error::BadRequest(format!("{field} must be a string")))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn atom(s: &str) -> Term { Term::Atom(s.to_owned()) }
    fn string(s: &str) -> Term { Term::Str(s.to_owned()) }

    fn request(command: &str, options: Vec<Term>) -> Term
    {
        Term::Tuple(vec![
            Term::Int(1),
            Term::Tuple(vec![string(command), Term::List(options)]),
        ])
    }

    #[test]
    fn decodes_minimal_request()
    {
        let spec = SpecDecoder::decode(&request("/bin/true", vec![])).unwrap();
        assert_eq!(spec.command, "/bin/true");
        assert_eq!(spec.transaction_id, 1);
        assert_eq!(spec.nice, None);
    }

    #[test]
    fn rejects_missing_command()
    {
        let term = Term::Tuple(vec![
            Term::Int(1),
            Term::Tuple(vec![string(""), Term::List(vec![])]),
        ]);
        assert!(matches!(SpecDecoder::decode(&term), Err(Error::BadRequest(_))));
    }

    #[test]
    fn rejects_out_of_range_nice()
    {
        let options = vec![Term::Tuple(vec![atom("nice"), Term::Int(25)])];
        assert!(matches!(
            SpecDecoder::decode(&request("/bin/ls", options)),
            Err(Error::BadRequest(_)),
        ));
    }

    #[test]
    fn rejects_redirect_cycle()
    {
        let options = vec![
            Term::Tuple(vec![atom("stdout"), atom("stderr")]),
            Term::Tuple(vec![atom("stderr"), atom("stdout")]),
        ];
        assert!(matches!(
            SpecDecoder::decode(&request("/bin/ls", options)),
            Err(Error::BadRequest(_)),
        ));
    }

    #[test]
    fn rejects_mount_as_reserved()
    {
        let options = vec![Term::Tuple(vec![atom("mount"), string("/dev/sda1")])];
        assert!(matches!(
            SpecDecoder::decode(&request("/bin/ls", options)),
            Err(Error::Reserved("mount")),
        ));
    }

    #[test]
    fn rejects_unknown_option()
    {
        let options = vec![Term::Tuple(vec![atom("bogus"), string("x")])];
        assert!(matches!(
            SpecDecoder::decode(&request("/bin/ls", options)),
            Err(Error::BadRequest(_)),
        ));
    }
}
