//! Implementations for the FTP commands defined in
//!
//! - [RFC 959 - FTP](https://tools.ietf.org/html/rfc959)
//! - [RFC 2228 - FTP Security Extensions](https://tools.ietf.org/html/rfc2228)
//! - [RFC 2389 - Feature negotiation](https://tools.ietf.org/html/rfc2389)
//! - [RFC 2428 - NAT-friendly extensions](https://tools.ietf.org/html/rfc2428)
//! - [RFC 3659 - Extensions to FTP](https://tools.ietf.org/html/rfc3659)

mod abor;
mod allo;
mod appe;
mod auth;
mod cdup;
mod cwd;
mod dele;
mod epsv;
mod feat;
mod help;
mod list;
mod mdtm;
mod mkd;
mod mlsd;
mod mlst;
mod mode;
mod nlst;
mod noop;
mod opts;
mod pass;
mod pasv;
mod pbsz;
mod port;
mod prot;
mod pwd;
mod quit;
mod rest;
mod retr;
mod rmd;
mod rnfr;
mod rnto;
mod site;
mod size;
mod stat;
mod stor;
mod stru;
mod syst;
mod type_;
mod user;

pub use abor::Abor;
pub use allo::Allo;
pub use appe::Appe;
pub use auth::Auth;
pub use cdup::Cdup;
pub use cwd::Cwd;
pub use dele::Dele;
pub use epsv::Epsv;
pub use feat::Feat;
pub use help::Help;
pub use list::List;
pub use mdtm::Mdtm;
pub use mkd::Mkd;
pub use mlsd::Mlsd;
pub use mlst::Mlst;
pub use mode::Mode;
pub use nlst::Nlst;
pub use noop::Noop;
pub use opts::Opts;
pub use pass::Pass;
pub use pasv::Pasv;
pub use pbsz::Pbsz;
pub use port::{Eprt, Port};
pub use prot::Prot;
pub use pwd::Pwd;
pub use quit::Quit;
pub use rest::Rest;
pub use retr::Retr;
pub use rmd::Rmd;
pub use rnfr::Rnfr;
pub use rnto::Rnto;
pub use site::Site;
pub use size::Size;
pub use stat::Stat;
pub use stor::Stor;
pub use stru::Stru;
pub use syst::Syst;
pub use type_::Type;
pub use user::User;

use dele::deny_by_user_rule_impl as deny_by_user_rule;

use super::command::Command;
use super::handler::CommandHandler;

/// The dispatch table: one handler per parsed command.
pub fn handler_for(cmd: &Command) -> Box<dyn CommandHandler> {
    match cmd.clone() {
        Command::User { username } => Box::new(User::new(username)),
        Command::Pass { password } => Box::new(Pass::new(password)),
        Command::AuthTls => Box::new(Auth),
        Command::Pbsz => Box::new(Pbsz),
        Command::Prot { param } => Box::new(Prot::new(param)),
        Command::Syst => Box::new(Syst),
        Command::Feat => Box::new(Feat),
        Command::Opts { option } => Box::new(Opts::new(option)),
        Command::Noop => Box::new(Noop),
        Command::Help => Box::new(Help),
        Command::Quit => Box::new(Quit),
        Command::Type { spec } => Box::new(Type::new(spec)),
        Command::Stru { structure } => Box::new(Stru::new(structure)),
        Command::Mode { mode } => Box::new(Mode::new(mode)),
        Command::Pwd => Box::new(Pwd),
        Command::Cwd { path } => Box::new(Cwd::new(path)),
        Command::Cdup => Box::new(Cdup),
        Command::Pasv => Box::new(Pasv),
        Command::Epsv => Box::new(Epsv),
        Command::Port { addr } => Box::new(Port::new(addr)),
        Command::Eprt { addr } => Box::new(Eprt::new(addr)),
        Command::Rest { offset } => Box::new(Rest::new(offset)),
        Command::Retr { path } => Box::new(Retr::new(path)),
        Command::Stor { path } => Box::new(Stor::new(path)),
        Command::Appe { path } => Box::new(Appe::new(path)),
        Command::Abor => Box::new(Abor),
        Command::List { path } => Box::new(List::new(path)),
        Command::Nlst { path } => Box::new(Nlst::new(path)),
        Command::Mlsd { path } => Box::new(Mlsd::new(path)),
        Command::Mlst { path } => Box::new(Mlst::new(path)),
        Command::Stat { path } => Box::new(Stat::new(path)),
        Command::Allo => Box::new(Allo),
        Command::Dele { path } => Box::new(Dele::new(path)),
        Command::Mkd { path } => Box::new(Mkd::new(path)),
        Command::Rmd { path } => Box::new(Rmd::new(path)),
        Command::Rnfr { path } => Box::new(Rnfr::new(path)),
        Command::Rnto { path } => Box::new(Rnto::new(path)),
        Command::Size { path } => Box::new(Size::new(path)),
        Command::Mdtm { path } => Box::new(Mdtm::new(path)),
        Command::Site { verb, args } => Box::new(Site::new(verb, args)),
    }
}
