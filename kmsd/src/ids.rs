#[macro_export]
macro_rules! define_id_type {
	(
        $name:ident,
        $prefix:literal
    ) => {
		paste::paste! {

				#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
				pub struct [<$name Id>](u64);

				impl [<$name Id>] {
						#[inline]
						pub fn rand() -> Self {
								Self(rand::random::<u64>())
						}
				}

				impl std::fmt::Display for [<$name Id>] {
						fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
								f.write_fmt(format_args!(concat!($prefix, "{:x}"), self.0))
						}
				}

				#[derive(thiserror::Error, Debug)]
				pub enum [<$name IdParseError>] {
						#[error("invalid id: {0}")]
						InvalidHex(std::num::ParseIntError),
						#[error("expected prefix '{expected}' but found {found:?}")]
						InvalidPrefix {
								expected: &'static str,
								found: Option<String>
						},
				}

				impl std::str::FromStr for [<$name Id>] {
						type Err = [<$name IdParseError>];

						fn from_str(s: &str) -> Result<Self, Self::Err> {
								let Some(hex) = s.strip_prefix($prefix) else {
										return Err(Self::Err::InvalidPrefix {
												expected: $prefix,
												found: s.split_once("_").map(|(prefix, _)| format!("{prefix}_"))
										});
								};
								u64::from_str_radix(hex, 16)
										.map(Self)
										.map_err(Self::Err::InvalidHex)
						}
				}
		}
	};
}

define_id_type!(Client, "cl_");

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_id_display_parses_back() {
		let id = ClientId::rand();
		let shown = id.to_string();
		assert!(shown.starts_with("cl_"));
		assert_eq!(shown.parse::<ClientId>().unwrap(), id);
	}

	#[test]
	fn client_id_rejects_foreign_prefix() {
		let err = "se_1f".parse::<ClientId>().unwrap_err();
		assert!(matches!(
			err,
			ClientIdParseError::InvalidPrefix {
				expected: "cl_",
				found: Some(ref p)
			} if p == "se_"
		));
		assert!(matches!(
			"cl_zz".parse::<ClientId>(),
			Err(ClientIdParseError::InvalidHex(_))
		));
	}
}
