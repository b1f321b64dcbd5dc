use knuffel::errors::DecodeError;

/// Value that tells the window system to keep whatever mode the display is already driving.
pub const DESKTOP: &str = "DESKTOP";

/// Persisted desktop screen mode.
///
/// Either [`DESKTOP`] or a mode identifier string as written by earlier runs. Identifiers are not
/// validated here: legacy or foreign values must still load, the window system degrades them to
/// a fallback selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenMode(pub String);

impl ScreenMode {
    pub fn is_desktop(&self) -> bool {
        self.0 == DESKTOP
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScreenMode {
    fn default() -> Self {
        Self(String::from(DESKTOP))
    }
}

impl<S: knuffel::traits::ErrorSpan> knuffel::DecodeScalar<S> for ScreenMode {
    fn type_check(
        type_name: &Option<knuffel::span::Spanned<knuffel::ast::TypeName, S>>,
        ctx: &mut knuffel::decode::Context<S>,
    ) {
        if let Some(type_name) = &type_name {
            ctx.emit_error(DecodeError::unexpected(
                type_name,
                "type name",
                "no type name expected for this node",
            ));
        }
    }

    fn raw_decode(
        val: &knuffel::span::Spanned<knuffel::ast::Literal, S>,
        ctx: &mut knuffel::decode::Context<S>,
    ) -> Result<ScreenMode, DecodeError<S>> {
        match &**val {
            knuffel::ast::Literal::String(ref s) => {
                let s = s.trim();
                if s.is_empty() {
                    ctx.emit_error(DecodeError::conversion(
                        val,
                        "screen mode must not be empty",
                    ));
                    return Ok(Self::default());
                }

                // Accept any casing for the sentinel, it is what users type by hand.
                if s.eq_ignore_ascii_case(DESKTOP) {
                    return Ok(Self::default());
                }

                Ok(Self(s.to_owned()))
            }
            _ => {
                ctx.emit_error(DecodeError::unsupported(
                    val,
                    "screen mode must be a string",
                ));
                Ok(Self::default())
            }
        }
    }
}
