macro_rules! def_units {
    ($t: ident, $unit: literal) => {
        #[doc = concat!("Denotes that the inner `T` is given in units of ", $unit, ".")]
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        pub struct $t<T>(pub T);

        impl<T> $t<T> {
            pub fn into_inner(self) -> T {
                self.0
            }

            pub fn map<S>(self, mut f: impl FnMut(T) -> S) -> $t<S> {
                $t(f(self.0))
            }
        }
    };
}

def_units!(VoxelUnits, "voxels");
def_units!(ChunkUnits, "chunks");
def_units!(GroupUnits, "coarse groups of chunks");
