#[macro_export]
macro_rules! agg_mod {
    [ $( $name:ident $(,)? )+ ] => {
        $(
            pub mod $name;
        )+
    };
}

/// Wire names for a fieldless enum: `as_str`, `Display` and a
/// case-insensitive `FromStr`.
#[macro_export]
macro_rules! impl_enum_str {
    ($enum_name:ident, $( $variant:ident => $text:literal ),+ $(,)?) => {
        impl $enum_name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $enum_name::$variant => $text, )+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_uppercase().as_str() {
                    $( $text => Ok($enum_name::$variant), )+
                    _ => Err($crate::ParseEnumError {
                        kind: stringify!($enum_name),
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
