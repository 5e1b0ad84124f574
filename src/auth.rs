use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal};
use zeroize::Zeroizing;

pub const PASSWORD_ENV: &str = "SALTSHADE_PASSWORD";

fn password_from_env() -> Option<Zeroizing<String>> {
    //  SALTSHADE_PASSWORD="supersecret" saltshade decrypt notes.txt --carrier cat.png
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

pub fn read_password() -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env() {
        return Ok(pw);
    }

    let pw = if io::stdin().is_terminal() {
        Zeroizing::new(rpassword::prompt_password("Password: ")?)
    } else {
        //  echo "supersecret" | saltshade decrypt notes.txt --carrier cat.png
        let mut line = Zeroizing::new(String::new());
        io::stdin().read_line(&mut line)?;
        trim_newline(&mut line);
        line
    };

    if !pw.is_empty() {
        return Ok(pw);
    }
    bail!("no password given (set {PASSWORD_ENV}, pipe it on stdin or type it at the prompt)")
}

/// Like [`read_password`], but asks twice when prompting so a typo cannot
/// lock the file away.
pub fn read_new_password_with_confirmation() -> Result<Zeroizing<String>> {
    if let Some(pw) = password_from_env() {
        return Ok(pw);
    }

    if !io::stdin().is_terminal() {
        let stdin = io::stdin();
        let mut handle = stdin.lock();

        let mut pw1 = Zeroizing::new(String::new());
        let mut pw2 = Zeroizing::new(String::new());

        handle.read_line(&mut pw1)?;
        handle.read_line(&mut pw2)?;

        trim_newline(&mut pw1);
        trim_newline(&mut pw2);

        return confirm(pw1, pw2);
    }

    let pw1 = Zeroizing::new(rpassword::prompt_password("New password: ")?);
    let pw2 = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);

    confirm(pw1, pw2)
}

fn confirm(pw1: Zeroizing<String>, pw2: Zeroizing<String>) -> Result<Zeroizing<String>> {
    if pw1.is_empty() {
        bail!("password cannot be empty");
    }

    if pw1 != pw2 {
        bail!("passwords do not match");
    }

    Ok(pw1)
}

fn trim_newline(s: &mut String) {
    while s.ends_with('\n') || s.ends_with('\r') {
        s.pop();
    }
}
